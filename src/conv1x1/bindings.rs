//! Caller-owned buffers bound to a primitive instance.

use crate::types::DataType;

/// Bias values in one of the accepted element types.
#[derive(Debug, Clone, Copy)]
pub enum BiasData<'a> {
    F32(&'a [f32]),
    S32(&'a [i32]),
    S8(&'a [i8]),
    U8(&'a [u8]),
}

impl BiasData<'_> {
    pub fn data_type(&self) -> DataType {
        match self {
            BiasData::F32(_) => DataType::F32,
            BiasData::S32(_) => DataType::S32,
            BiasData::S8(_) => DataType::S8,
            BiasData::U8(_) => DataType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BiasData::F32(b) => b.len(),
            BiasData::S32(b) => b.len(),
            BiasData::S8(b) => b.len(),
            BiasData::U8(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn get_f32(&self, i: usize) -> f32 {
        match self {
            BiasData::F32(b) => b[i],
            BiasData::S32(b) => b[i] as f32,
            BiasData::S8(b) => b[i] as f32,
            BiasData::U8(b) => b[i] as f32,
        }
    }

    /// Integral bias value. Float bias is truncated; callers only use this
    /// when the bias type is integral.
    #[inline(always)]
    pub fn get_i64(&self, i: usize) -> i64 {
        match self {
            BiasData::F32(b) => b[i] as i64,
            BiasData::S32(b) => b[i] as i64,
            BiasData::S8(b) => b[i] as i64,
            BiasData::U8(b) => b[i] as i64,
        }
    }
}

/// Destination buffer in one of the accepted element types.
#[derive(Debug)]
pub enum DstData<'a> {
    U8(&'a mut [u8]),
    S8(&'a mut [i8]),
    S32(&'a mut [i32]),
    F32(&'a mut [f32]),
}

impl DstData<'_> {
    pub fn data_type(&self) -> DataType {
        match self {
            DstData::U8(_) => DataType::U8,
            DstData::S8(_) => DataType::S8,
            DstData::S32(_) => DataType::S32,
            DstData::F32(_) => DataType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DstData::U8(d) => d.len(),
            DstData::S8(d) => d.len(),
            DstData::S32(d) => d.len(),
            DstData::F32(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base pointer with the element type erased.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            DstData::U8(d) => d.as_mut_ptr(),
            DstData::S8(d) => d.as_mut_ptr() as *mut u8,
            DstData::S32(d) => d.as_mut_ptr() as *mut u8,
            DstData::F32(d) => d.as_mut_ptr() as *mut u8,
        }
    }
}

/// Read-only inputs: nhwc source, blocked weights, optional bias.
#[derive(Debug, Clone, Copy)]
pub struct InputBindings<'a> {
    pub src: &'a [u8],
    pub weights: &'a [i8],
    pub bias: Option<BiasData<'a>>,
}

#[derive(Debug)]
pub struct OutputBindings<'a> {
    pub dst: DstData<'a>,
}
