//! Math-kernel operations exercised through the dispatch surface, with the
//! optional-tail default behavior the catalogue documents.

use despachar::{Device, Op};

fn dev() -> Device<f32> {
    Device::host()
}

fn alloc(d: &mut Device<f32>, values: &[f32]) -> f32 {
    let h = d.invoke(Op::AllocMemory, &[values.len() as f32]).unwrap()[0];
    let mut args = vec![h, values.len() as f32];
    args.extend_from_slice(values);
    d.invoke(Op::SetMemory, &args).unwrap();
    h
}

fn read(d: &mut Device<f32>, h: f32) -> Vec<f32> {
    d.invoke(Op::GetMemory, &[h]).unwrap()
}

#[test]
fn elementwise_family() {
    let mut d = dev();
    let ha = alloc(&mut d, &[1.0, -4.0, 9.0]);
    let hb = alloc(&mut d, &[2.0, 2.0, 3.0]);
    let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];

    d.invoke(Op::Add, &[3.0, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![3.0, -2.0, 12.0]);
    d.invoke(Op::Sub, &[3.0, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![-1.0, -6.0, 6.0]);
    d.invoke(Op::Mul, &[3.0, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![2.0, -8.0, 27.0]);
    d.invoke(Op::Div, &[3.0, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![0.5, -2.0, 3.0]);
    d.invoke(Op::Abs, &[3.0, ha, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![1.0, 4.0, 9.0]);
    d.invoke(Op::Sign, &[3.0, ha, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![1.0, -1.0, 1.0]);
    d.invoke(Op::Powx, &[3.0, hb, 2.0, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![4.0, 4.0, 9.0]);

    d.invoke(Op::Add2, &[3.0, ha, hb, hy, 2.0, 0.5]).unwrap();
    assert_eq!(read(&mut d, hy), vec![3.0, -7.0, 19.5]);
    d.invoke(Op::AddScalar, &[3.0, 1.0, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![4.0, -6.0, 20.5]);
    d.invoke(Op::MulScalar, &[3.0, 2.0, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![8.0, -12.0, 41.0]);
}

#[test]
fn blas_family_with_optional_offsets() {
    let mut d = dev();
    // x sits at offset 2 inside a larger buffer
    let hx = alloc(&mut d, &[0.0, 0.0, 1.0, 2.0]);
    let hy = alloc(&mut d, &[10.0, 20.0]);
    d.invoke(Op::Axpy, &[2.0, 2.0, hx, hy, 2.0]).unwrap();
    assert_eq!(read(&mut d, hy), vec![12.0, 24.0]);

    d.invoke(Op::Axpby, &[2.0, 1.0, hy, 0.5, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![18.0, 36.0]);

    d.invoke(Op::Scal, &[2.0, 0.5, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![9.0, 18.0]);

    let hsq = alloc(&mut d, &[3.0, 4.0]);
    let hwork = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    assert_eq!(
        d.invoke(Op::SumSq, &[2.0, hwork, hsq]).unwrap(),
        vec![25.0]
    );
    let hsq2 = alloc(&mut d, &[0.0, 0.0]);
    assert_eq!(
        d.invoke(Op::SumSqDiff, &[2.0, hwork, hsq, hsq2]).unwrap(),
        vec![25.0]
    );
    assert_eq!(
        d.invoke(Op::SubAndDot, &[2.0, hsq, hsq2, hwork]).unwrap(),
        vec![25.0]
    );
}

#[test]
fn gemv_and_gemm2_leading_dims() {
    let mut d = dev();
    let ha = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let hx = alloc(&mut d, &[1.0, 0.0, 1.0]);
    let hy = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::Gemv, &[0.0, 2.0, 3.0, 1.0, ha, hx, 0.0, hy])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![4.0, 10.0]);

    let hb = alloc(&mut d, &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    let hc = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    // lda 3 (row-major 2x3), ldb 2 (3x2), ldc 2
    d.invoke(
        Op::Gemm2,
        &[0.0, 0.0, 2.0, 2.0, 3.0, 1.0, ha, hb, 0.0, hc, 3.0, 2.0, 2.0],
    )
    .unwrap();
    assert_eq!(read(&mut d, hc), vec![1.0, 2.0, 4.0, 5.0]);
}

#[test]
fn logistic_and_transcendental_kernels() {
    let mut d = dev();
    let hx = alloc(&mut d, &[0.0]);
    let hy = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    d.invoke(Op::Logistic1, &[1.0, hx, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![0.5]);
    d.invoke(Op::Logistic2, &[1.0, hx, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![0.5]);
    d.invoke(Op::Student, &[1.0, hx, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![1.0]);

    let he = alloc(&mut d, &[1.0]);
    d.invoke(Op::Exp, &[1.0, hx, he]).unwrap();
    assert_eq!(read(&mut d, he), vec![1.0]);
    d.invoke(Op::Log, &[1.0, he, he]).unwrap();
    assert_eq!(read(&mut d, he), vec![0.0]);
    let hr = alloc(&mut d, &[4.0]);
    d.invoke(Op::Sqrt, &[1.0, hr, hr]).unwrap();
    assert_eq!(read(&mut d, hr), vec![2.0]);
    d.invoke(Op::Reciprocol, &[1.0, hr, hr]).unwrap();
    assert_eq!(read(&mut d, hr), vec![0.5]);
}

#[test]
fn denan_and_compare_signs() {
    let mut d = dev();
    let h = alloc(&mut d, &[1.0, f32::NAN]);
    d.invoke(Op::Denan, &[2.0, h, -1.0]).unwrap();
    assert_eq!(read(&mut d, h), vec![1.0, -1.0]);

    let ha = alloc(&mut d, &[1.0, -2.0]);
    let hb = alloc(&mut d, &[3.0, 4.0]);
    let hy = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::CompareSigns, &[2.0, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![1.0, 0.0]);
}

#[test]
fn channel_ops_compose_into_softmax() {
    let mut d = dev();
    // outer 1, channels 2, inner 2
    let hx = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let hs = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::ChannelMax, &[2.0, 1.0, 2.0, 2.0, hx, hs])
        .unwrap();
    assert_eq!(read(&mut d, hs), vec![3.0, 4.0]);
    d.invoke(Op::ChannelSub, &[4.0, 1.0, 2.0, 2.0, hs, hx])
        .unwrap();
    d.invoke(Op::Exp, &[4.0, hx, hx]).unwrap();
    d.invoke(Op::ChannelSum, &[2.0, 1.0, 2.0, 2.0, hx, hs])
        .unwrap();
    d.invoke(Op::ChannelDiv, &[4.0, 1.0, 2.0, 2.0, hs, hx])
        .unwrap();
    let result = read(&mut d, hx);
    assert!((result[0] + result[2] - 1.0).abs() < 1e-5);
    assert!((result[1] + result[3] - 1.0).abs() < 1e-5);

    let h1 = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let hdot = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::ChannelDot, &[2.0, 1.0, 2.0, 2.0, h1, h1, hdot])
        .unwrap();
    assert_eq!(read(&mut d, hdot), vec![10.0, 20.0]);
}

#[test]
fn layer_kernels_through_dispatch() {
    let mut d = dev();
    // leaky relu with default-free layout
    let hx = alloc(&mut d, &[-2.0, 2.0]);
    let hy = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::ReluFwd, &[2.0, hx, hy, 0.5]).unwrap();
    assert_eq!(read(&mut d, hy), vec![-1.0, 2.0]);

    // elu keeps positives
    d.invoke(Op::EluFwd, &[2.0, hx, hy, 1.0]).unwrap();
    let y = read(&mut d, hy);
    assert!((y[0] - ((-2.0_f32).exp() - 1.0)).abs() < 1e-6);
    assert_eq!(y[1], 2.0);

    // threshold
    d.invoke(Op::ThresholdFwd, &[2.0, 0.0, hx, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![0.0, 1.0]);

    // bnll backward equals sigmoid of the input
    let htd = alloc(&mut d, &[1.0, 1.0]);
    let hbd = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::BnllBwd, &[2.0, htd, hx, hbd]).unwrap();
    let bd = read(&mut d, hbd);
    assert!((bd[1] - 1.0 / (1.0 + (-2.0_f32).exp())).abs() < 1e-6);
}

#[test]
fn bias_scale_tile_concat_slice() {
    let mut d = dev();
    let hx = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let hbias = alloc(&mut d, &[10.0, 20.0]);
    let hy = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    // bias_dim 2, inner 2
    d.invoke(Op::BiasFwd, &[4.0, hx, hbias, 2.0, 2.0, hy])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![11.0, 12.0, 23.0, 24.0]);

    // scale with fused bias (optional seventh argument)
    d.invoke(Op::ScaleFwd, &[4.0, hx, hbias, 2.0, 2.0, hy, hbias])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![20.0, 30.0, 80.0, 100.0]);
    // without the bias tail
    d.invoke(Op::ScaleFwd, &[4.0, hx, hbias, 2.0, 2.0, hy])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![10.0, 20.0, 60.0, 80.0]);

    // tile then sum back
    let ht = d.invoke(Op::AllocMemory, &[8.0]).unwrap()[0];
    d.invoke(Op::TileFwd, &[8.0, hx, 4.0, 2.0, 1.0, ht]).unwrap();
    let t = read(&mut d, ht);
    assert_eq!(&t[..4], &t[4..]);
    let hback = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::TileBwd, &[4.0, ht, 4.0, 2.0, 1.0, hback])
        .unwrap();
    assert_eq!(read(&mut d, hback), vec![2.0, 4.0, 6.0, 8.0]);

    // slice out the second half of a concat
    let htop = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    let hb0 = alloc(&mut d, &[1.0, 2.0]);
    let hb1 = alloc(&mut d, &[3.0, 4.0]);
    d.invoke(Op::ConcatFwd, &[2.0, hb0, 1.0, 1.0, 4.0, 2.0, 0.0, htop])
        .unwrap();
    d.invoke(Op::ConcatFwd, &[2.0, hb1, 1.0, 1.0, 4.0, 2.0, 2.0, htop])
        .unwrap();
    assert_eq!(read(&mut d, htop), vec![1.0, 2.0, 3.0, 4.0]);
    let hs = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::SliceFwd, &[2.0, htop, 1.0, 1.0, 4.0, 2.0, 0.0, hs])
        .unwrap();
    assert_eq!(read(&mut d, hs), vec![1.0, 2.0]);
}

#[test]
fn pooling_and_unpooling_kernels() {
    let mut d = dev();
    // 1x1x2x2 -> 1x1x1x1 max pool
    let hx = alloc(&mut d, &[1.0, 7.0, 3.0, 2.0]);
    let hy = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    let hmask = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    d.invoke(
        Op::PoolingFwd,
        &[
            0.0, 1.0, hx, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 0.0, 0.0, hy, hmask,
            0.0,
        ],
    )
    .unwrap();
    assert_eq!(read(&mut d, hy), vec![7.0]);
    assert_eq!(read(&mut d, hmask), vec![1.0]);

    // unpool the pooled value back through the mask
    let hun = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::UnpoolingFwd,
        &[
            0.0, 1.0, hy, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 1.0, 1.0, 0.0, 0.0, hun, hmask,
        ],
    )
    .unwrap();
    assert_eq!(read(&mut d, hun), vec![0.0, 7.0, 0.0, 0.0]);

    // stochastic method is refused
    let err = d
        .invoke(
            Op::PoolingFwd,
            &[
                2.0, 1.0, hx, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 0.0, 0.0, hy,
                hmask, 0.0,
            ],
        )
        .unwrap_err();
    assert_eq!(err.code(), 8);
}

#[test]
fn embed_and_batch_reindex() {
    let mut d = dev();
    let hw = alloc(&mut d, &[10.0, 11.0, 20.0, 21.0, 30.0, 31.0]);
    let hidx = alloc(&mut d, &[2.0, 0.0]);
    let htop = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::EmbedFwd, &[4.0, hidx, hw, 2.0, 2.0, 3.0, htop])
        .unwrap();
    assert_eq!(read(&mut d, htop), vec![30.0, 31.0, 10.0, 11.0]);

    let hperm = alloc(&mut d, &[1.0, 0.0]);
    let hsrc = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let hdst = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::BatchReidxFwd, &[4.0, 2.0, hsrc, hperm, hdst])
        .unwrap();
    assert_eq!(read(&mut d, hdst), vec![3.0, 4.0, 1.0, 2.0]);
}

#[test]
fn lrn_kernel_pipeline() {
    let mut d = dev();
    let hx = alloc(&mut d, &[1.0, 2.0, 3.0]);
    let hscale = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    // num 1, channels 3, 1x1 spatial, window 3, alpha/size 1, k 1
    d.invoke(
        Op::LrnFillScale,
        &[3.0, hx, 1.0, 3.0, 1.0, 1.0, 3.0, 1.0, 1.0, hscale],
    )
    .unwrap();
    let scale = read(&mut d, hscale);
    assert_eq!(scale, vec![6.0, 15.0, 14.0]);
    let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    d.invoke(Op::LrnComputeOutput, &[3.0, hx, hscale, -0.75, hy])
        .unwrap();
    let y = read(&mut d, hy);
    assert!((y[0] - 1.0 * 6.0_f32.powf(-0.75)).abs() < 1e-5);
}

#[test]
fn contrastive_loss_backward() {
    let mut d = dev();
    // one similar pair, one dissimilar pair, channel dim 1
    let hy_label = alloc(&mut d, &[1.0, 0.0]);
    let hdiff = alloc(&mut d, &[0.5, 0.5]);
    let hdist = alloc(&mut d, &[0.25, 0.25]);
    let hbd = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(
        Op::CllBwd,
        &[2.0, 1.0, 1.0, 0.0, 2.0, hy_label, hdiff, hdist, hbd],
    )
    .unwrap();
    let bd = read(&mut d, hbd);
    assert_eq!(bd[0], 1.0, "similar pair pulls together");
    assert!(bd[1] < 0.0, "dissimilar pair inside margin pushes apart");
}

#[test]
fn hamming_and_blur_kernels() {
    let mut d = dev();
    let ha = alloc(&mut d, &[0.9, 0.1, 0.9]);
    let hb = alloc(&mut d, &[0.9, 0.9, 0.1]);
    let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    d.invoke(Op::HammingDiff, &[3.0, 0.5, ha, hb, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![0.0, 1.0, 1.0]);

    let himg = alloc(&mut d, &[1.0; 9]);
    let hblur = d.invoke(Op::AllocMemory, &[9.0]).unwrap()[0];
    d.invoke(Op::GaussianBlur, &[9.0, 1.0, 3.0, 3.0, 0.8, himg, hblur])
        .unwrap();
    for v in read(&mut d, hblur) {
        assert!((v - 1.0).abs() < 1e-4);
    }
}

#[test]
fn matrix_utilities_through_dispatch() {
    let mut d = dev();
    let ha = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let hy = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::MtxTranspose, &[2.0, 2.0, ha, hy]).unwrap();
    assert_eq!(read(&mut d, hy), vec![1.0, 3.0, 2.0, 4.0]);

    d.invoke(Op::MtxSetDiagonal, &[4.0, 2.0, 9.0, ha]).unwrap();
    assert_eq!(read(&mut d, ha), vec![9.0, 2.0, 3.0, 9.0]);

    let hvec = alloc(&mut d, &[1.0, -1.0]);
    d.invoke(Op::MtxAddVector, &[0.0, 2.0, 2.0, 1.0, ha, hvec, hy])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![10.0, 1.0, 4.0, 8.0]);

    let hagg = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::MtxAggregateCols, &[0.0, 2.0, 2.0, ha, hagg])
        .unwrap();
    assert_eq!(read(&mut d, hagg), vec![12.0, 11.0]);

    let hc = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::MtxDot, &[2.0, 2.0, 2.0, ha, ha, hc]).unwrap();
    // [9 2; 3 9]^2 = [87 36; 54 87]
    assert_eq!(read(&mut d, hc), vec![87.0, 36.0, 54.0, 87.0]);

    let hcent = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::MtxMeanCenterByColumn, &[2.0, 2.0, ha, hcent])
        .unwrap();
    let c = read(&mut d, hcent);
    assert_eq!(c[0] + c[2], 0.0);
    assert_eq!(c[1] + c[3], 0.0);
}

#[test]
fn tsne_math_kernels_through_dispatch() {
    let mut d = dev();
    let hy = alloc(&mut d, &[0.0, 0.0, 1.0, 0.0]);
    let hdd = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::TsneComputeSquaredEuclideanDistance, &[2.0, 2.0, hy, hdd])
        .unwrap();
    assert_eq!(read(&mut d, hdd), vec![0.0, 1.0, 1.0, 0.0]);

    let hq = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    let sum = d
        .invoke(Op::TsneComputeQMatrix, &[2.0, hdd, hq, 1.0])
        .unwrap();
    assert_eq!(sum, vec![1.0]);

    let hp = alloc(&mut d, &[0.0, 0.5, 0.5, 0.0]);
    let hdc = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::TsneComputeExactGradient,
        &[2.0, 2.0, hy, hp, hq, hdc, sum[0]],
    )
    .unwrap();
    for v in read(&mut d, hdc) {
        assert!(v.abs() < 1e-6);
    }

    let hwork = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    let err = d
        .invoke(Op::TsneComputeExactError, &[2.0, hp, hq, hwork])
        .unwrap();
    assert!(err[0].is_finite());

    let bounds = d
        .invoke(Op::TsneComputeKnnBounds, &[2.0, hy, 1.0])
        .unwrap();
    assert_eq!(bounds, vec![0.0, 0.0, 1.0, 0.0]);

    // zero normalizer is rejected
    let hpos = alloc(&mut d, &[1.0]);
    let hneg = alloc(&mut d, &[1.0]);
    let hdc1 = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    let errz = d
        .invoke(Op::TsneUpdateGrad, &[1.0, hpos, hneg, 0.0, hdc1])
        .unwrap_err();
    assert_eq!(errz.code(), 2);
}
