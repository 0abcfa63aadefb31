//! End-to-end tests of the 1×1 convolution primitive: create, instantiate,
//! execute and compare against a naive reference convolution.

mod common;

use common::*;
use qconv_kernels::*;

// ═══════════════════════════════════════════════════════════════════════
// Saturation and post-ops on tiny problems
// ═══════════════════════════════════════════════════════════════════════

/// 1 pixel, 2 input channels, 1 output channel.
fn tiny(src: [u8; 2], w: [i8; 2], dst_dt: DataType) -> (Conv1x1Pd, Vec<u8>, Vec<i8>) {
    let p = Problem::new(1, 2, 1, 1);
    let pd = create(&p.desc(dst_dt, None), &PrimitiveAttr::new(), &auto_hints(1));
    let weights = pack_weights(&w, pd.weights_desc()).unwrap();
    (pd, src.to_vec(), weights)
}

#[test]
fn test_dot_product_per_dst_type() {
    let (pd, src, w) = tiny([10, 20], [1, -1], DataType::U8);
    let mut d = [7u8; 1];
    run(&pd, &src, &w, None, DstData::U8(&mut d));
    assert_eq!(d, [0]);

    let (pd, src, w) = tiny([10, 20], [1, -1], DataType::S8);
    let mut d = [0i8; 1];
    run(&pd, &src, &w, None, DstData::S8(&mut d));
    assert_eq!(d, [-10]);

    let (pd, src, w) = tiny([10, 20], [1, -1], DataType::S32);
    let mut d = [0i32; 1];
    run(&pd, &src, &w, None, DstData::S32(&mut d));
    assert_eq!(d, [-10]);

    let (pd, src, w) = tiny([10, 20], [1, -1], DataType::F32);
    let mut d = [0f32; 1];
    run(&pd, &src, &w, None, DstData::F32(&mut d));
    assert_eq!(d, [-10.0]);
}

#[test]
fn test_accumulation_saturates() {
    let (pd, src, w) = tiny([100, 200], [1, 1], DataType::U8);
    let mut d = [0u8; 1];
    run(&pd, &src, &w, None, DstData::U8(&mut d));
    assert_eq!(d, [255]);

    let (pd, src, w) = tiny([100, 200], [1, 1], DataType::S8);
    let mut d = [0i8; 1];
    run(&pd, &src, &w, None, DstData::S8(&mut d));
    assert_eq!(d, [127]);

    let (pd, src, w) = tiny([255, 255], [-128, -128], DataType::S8);
    let mut d = [0i8; 1];
    run(&pd, &src, &w, None, DstData::S8(&mut d));
    assert_eq!(d, [-128]);
}

#[test]
fn test_bias_and_relu() {
    let p = Problem::new(1, 2, 2, 1);
    let attr = PrimitiveAttr::new().with_relu(0.0);
    let pd = create(&p.desc(DataType::S32, Some(DataType::S32)), &attr, &auto_hints(1));
    assert!(pd.conf().integer_epilogue);
    // oc0 = 10 - 20 + 5 = -5 -> relu 0; oc1 = 10 + 20 - 3 = 27
    let weights = pack_weights(&[1, -1, 1, 1], pd.weights_desc()).unwrap();
    let bias = [5i32, -3];
    let mut d = [0i32; 2];
    run(&pd, &[10, 20], &weights, Some(BiasData::S32(&bias)), DstData::S32(&mut d));
    assert_eq!(d, [0, 27]);
}

#[test]
fn test_narrow_integer_bias() {
    let p = Problem::new(1, 2, 2, 1);
    let attr = PrimitiveAttr::new();
    let weights_plain = [1i8, -1, 1, 1];

    let pd = create(&p.desc(DataType::S32, Some(DataType::S8)), &attr, &auto_hints(1));
    assert!(pd.conf().integer_epilogue);
    let weights = pack_weights(&weights_plain, pd.weights_desc()).unwrap();
    let bias = [-5i8, 7];
    let mut d = [0i32; 2];
    run(&pd, &[10, 20], &weights, Some(BiasData::S8(&bias)), DstData::S32(&mut d));
    assert_eq!(d, [-15, 37]);

    // u8 bias must not be read as signed: 250 stays 250
    let pd = create(&p.desc(DataType::S32, Some(DataType::U8)), &attr, &auto_hints(1));
    assert!(pd.conf().integer_epilogue);
    let weights = pack_weights(&weights_plain, pd.weights_desc()).unwrap();
    let bias = [250u8, 7];
    let mut d = [0i32; 2];
    run(&pd, &[10, 20], &weights, Some(BiasData::U8(&bias)), DstData::S32(&mut d));
    assert_eq!(d, [240, 37]);
}

#[test]
fn test_leaky_relu_scales_and_rounding() {
    let p = Problem::new(1, 2, 2, 1);
    let attr = PrimitiveAttr::new()
        .with_output_scales(OutputScales::PerOc(vec![0.5, 0.25]))
        .with_relu(0.5)
        .with_round_mode(RoundMode::Down);
    let pd = create(&p.desc(DataType::S8, Some(DataType::F32)), &attr, &auto_hints(1));
    assert!(!pd.conf().integer_epilogue);
    assert_eq!(pd.conf().scale_mask, 2);
    let weights = pack_weights(&[1, -1, 1, 1], pd.weights_desc()).unwrap();
    let bias = [1.0f32, 3.0];
    let mut d = [0i8; 2];
    run(&pd, &[10, 20], &weights, Some(BiasData::F32(&bias)), DstData::S8(&mut d));
    // oc0: (-10 + 1) * 0.5 = -4.5, leaky * 0.5 = -2.25, floor = -3
    // oc1: (30 + 3) * 0.25 = 8.25, floor = 8
    assert_eq!(d, [-3, 8]);

    let attr = attr.with_round_mode(RoundMode::Nearest);
    let pd = create(&p.desc(DataType::S8, Some(DataType::F32)), &attr, &auto_hints(1));
    let mut d = [0i8; 2];
    run(&pd, &[10, 20], &weights, Some(BiasData::F32(&bias)), DstData::S8(&mut d));
    assert_eq!(d, [-2, 8]);
}

#[test]
fn test_common_scale_to_f32() {
    let p = Problem::new(1, 2, 1, 1);
    let attr = PrimitiveAttr::new().with_output_scales(OutputScales::Common(0.125));
    let pd = create(&p.desc(DataType::F32, None), &attr, &auto_hints(1));
    let weights = pack_weights(&[1, 1], pd.weights_desc()).unwrap();
    let mut d = [0f32; 1];
    run(&pd, &[3, 2], &weights, None, DstData::F32(&mut d));
    assert_eq!(d, [0.625]);
}

// ═══════════════════════════════════════════════════════════════════════
// Whole problems against the reference
// ═══════════════════════════════════════════════════════════════════════

fn check_against_reference(p: Problem, hints: &CreateHints) {
    let src = pattern_u8(p.src_len(), 1);
    let plain = pattern_i8(p.weights_len(), 2);
    let got = run_s32(&p, hints, &src, &plain);
    let want = p.reference_acc(&src, &plain);
    assert_eq!(got, want, "{p:?}");
}

#[test]
fn test_unit_stride_matches_reference() {
    check_against_reference(Problem::new(2, 20, 35, 5), &auto_hints(3));
    check_against_reference(Problem::new(1, 64, 64, 7), &auto_hints(4));
}

#[test]
fn test_channel_tails_match_reference() {
    check_against_reference(Problem::new(1, 3, 5, 3), &auto_hints(2));
    check_against_reference(Problem::new(1, 17, 33, 4), &scalar_hints(2));
}

#[test]
fn test_strided_matches_reference() {
    check_against_reference(Problem::new(1, 16, 32, 8).stride(2), &auto_hints(2));
    check_against_reference(Problem::new(2, 5, 7, 9).stride(3), &scalar_hints(3));
}

#[test]
fn test_strided_padded_matches_reference() {
    let p = Problem::new(1, 12, 20, 7).stride(2).pad(1);
    assert_eq!((p.oh(), p.ow()), (5, 5));
    check_against_reference(p, &auto_hints(2));
    check_against_reference(p, &scalar_hints(1));
}

#[test]
fn test_grouped_matches_reference() {
    check_against_reference(Problem::new(2, 12, 20, 4).groups(2), &auto_hints(3));
    check_against_reference(Problem::new(1, 24, 36, 6).groups(3).stride(2).pad(1), &auto_hints(2));
}

#[test]
fn test_thread_count_does_not_change_result() {
    let p = Problem::new(2, 40, 70, 9);
    let src = pattern_u8(p.src_len(), 5);
    let plain = pattern_i8(p.weights_len(), 6);
    let one = run_s32(&p, &auto_hints(1), &src, &plain);
    let many = run_s32(&p, &auto_hints(4), &src, &plain);
    assert_eq!(one, many);
}

// ═══════════════════════════════════════════════════════════════════════
// Stride elimination and determinism
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_forced_stride_elimination_is_identity() {
    let p = Problem::new(2, 20, 35, 5);
    let src = pattern_u8(p.src_len(), 3);
    let plain = pattern_i8(p.weights_len(), 4);

    let direct_pd = create(&p.desc(DataType::S32, None), &PrimitiveAttr::new(), &auto_hints(2));
    assert!(!direct_pd.rtus().reduce_src);

    let forced_hints = auto_hints(2).with_forced_stride_elimination();
    let forced_pd = create(&p.desc(DataType::S32, None), &PrimitiveAttr::new(), &forced_hints);
    assert!(forced_pd.rtus().reduce_src);

    let direct = run_s32(&p, &auto_hints(2), &src, &plain);
    let forced = run_s32(&p, &forced_hints, &src, &plain);
    assert_eq!(direct, forced);
}

#[test]
fn test_repeated_execute_is_bit_identical() {
    let p = Problem::new(1, 24, 40, 6).stride(2);
    let pd = create(
        &p.desc(DataType::F32, Some(DataType::F32)),
        &PrimitiveAttr::new().with_output_scales(OutputScales::Common(0.37)),
        &auto_hints(3),
    );
    let src = pattern_u8(p.src_len(), 7);
    let weights = pack_weights(&pattern_i8(p.weights_len(), 8), pd.weights_desc()).unwrap();
    let bias: Vec<f32> = (0..p.oc).map(|i| i as f32 * 0.5 - 3.0).collect();

    let mut dst = vec![0f32; p.dst_len()];
    let mut prim = Conv1x1Primitive::new(
        &pd,
        InputBindings { src: &src, weights: &weights, bias: Some(BiasData::F32(&bias)) },
        OutputBindings { dst: DstData::F32(&mut dst) },
    )
    .unwrap();

    let mut event = Event::new();
    prim.execute(&mut event);
    let first: Vec<u32> = match &prim.outputs().dst {
        DstData::F32(d) => d.iter().map(|v| v.to_bits()).collect(),
        other => panic!("unexpected dst {:?}", other.data_type()),
    };
    event.reset();
    prim.execute(&mut event);
    assert!(event.is_ready());
    let second: Vec<u32> = match &prim.outputs().dst {
        DstData::F32(d) => d.iter().map(|v| v.to_bits()).collect(),
        other => panic!("unexpected dst {:?}", other.data_type()),
    };
    assert_eq!(first, second);
}

// ═══════════════════════════════════════════════════════════════════════
// Resolution and error paths
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_float_src_is_unimplemented() {
    let mut d = Problem::new(1, 4, 4, 2).desc(DataType::S32, None);
    d.src_desc.data_type = DataType::F32;
    let err = Conv1x1Pd::create(&d, &PrimitiveAttr::new(), LayoutPolicy::PreferKernel, &auto_hints(1))
        .unwrap_err();
    assert!(err.is_unimplemented());
    assert!(!err.is_fatal());
}

#[test]
fn test_weights_layout_defaults() {
    let pd = create(
        &Problem::new(1, 8, 8, 2).desc(DataType::U8, None),
        &PrimitiveAttr::new(),
        &auto_hints(1),
    );
    assert_eq!(pd.weights_desc().format, FormatTag::OIhw4i16o4i);

    let pd = create(
        &Problem::new(1, 8, 8, 2).groups(2).desc(DataType::U8, None),
        &PrimitiveAttr::new(),
        &auto_hints(1),
    );
    assert_eq!(pd.weights_desc().format, FormatTag::GOIhw4i16o4i);
    assert_eq!(pd.src_desc().format, FormatTag::Nhwc);
    assert_eq!(pd.dst_desc().format, FormatTag::Nhwc);
}

#[test]
fn test_bias_binding_mismatch_is_invalid() {
    let p = Problem::new(1, 2, 2, 1);
    let pd = create(&p.desc(DataType::S32, Some(DataType::S32)), &PrimitiveAttr::new(), &auto_hints(1));
    let weights = vec![0i8; pd.weights_desc().padded_nelems()];
    let bias = [1.0f32, 2.0];
    let mut dst = [0i32; 2];
    let err = Conv1x1Primitive::new(
        &pd,
        InputBindings { src: &[1, 2], weights: &weights, bias: Some(BiasData::F32(&bias)) },
        OutputBindings { dst: DstData::S32(&mut dst) },
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConvError::InvalidArgument(_)));
}

#[test]
fn test_short_dst_is_invalid() {
    let p = Problem::new(1, 4, 4, 2);
    let pd = create(&p.desc(DataType::U8, None), &PrimitiveAttr::new(), &auto_hints(1));
    let src = vec![0u8; p.src_len()];
    let weights = vec![0i8; pd.weights_desc().padded_nelems()];
    let mut dst = vec![0u8; p.dst_len() - 1];
    let err = Conv1x1Primitive::new(
        &pd,
        InputBindings { src: &src, weights: &weights, bias: None },
        OutputBindings { dst: DstData::U8(&mut dst) },
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConvError::InvalidArgument(_)));
}

// ═══════════════════════════════════════════════════════════════════════
// ISA specializations agree
// ═══════════════════════════════════════════════════════════════════════

#[cfg(target_arch = "x86_64")]
macro_rules! skip_without_vnni {
    () => {
        if !std::is_x86_feature_detected!("avx512vnni") {
            eprintln!("AVX-512 VNNI not supported on this CPU, skipping");
            return;
        }
    };
}

#[test]
#[cfg(target_arch = "x86_64")]
fn test_vnni_matches_interpreted() {
    skip_without_vnni!();
    let vnni_hints = auto_hints(3).with_isa(IsaLevel::Avx512CoreVnni);
    for p in [
        Problem::new(2, 40, 70, 9),
        Problem::new(1, 24, 36, 7).groups(3).stride(2).pad(1),
        Problem::new(1, 3, 5, 2),
    ] {
        let pd = create(&p.desc(DataType::S32, None), &PrimitiveAttr::new(), &vnni_hints);
        assert_eq!(pd.name(), "jit_1x1:avx512_core_vnni");

        let src = pattern_u8(p.src_len(), 9);
        let plain = pattern_i8(p.weights_len(), 10);
        let vnni = run_s32(&p, &vnni_hints, &src, &plain);
        let interpreted = run_s32(&p, &scalar_hints(3), &src, &plain);
        assert_eq!(vnni, interpreted, "{p:?}");
    }
}
