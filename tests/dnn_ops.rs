//! Descriptor-driven operations exercised end to end through dispatch:
//! full convolution forward/backward, pooling, dropout, activations, LRN and
//! LCN, including the shape checks that guard them.

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

fn tensor(d: &mut Device<f32>, n: f32, c: f32, h: f32, w: f32) -> f32 {
    let t = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
    d.invoke(Op::SetTensorDesc, &[t, n, c, h, w]).unwrap();
    t
}

#[test]
fn conv_forward_backward_cycle() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let bdesc = tensor(&mut d, 1.0, 1.0, 3.0, 3.0);
    let tdesc = tensor(&mut d, 1.0, 1.0, 2.0, 2.0);
    let bias_desc = tensor(&mut d, 1.0, 1.0, 1.0, 1.0);
    let fdesc = d.invoke(Op::CreateFilterDesc, &[]).unwrap()[0];
    d.invoke(Op::SetFilterDesc, &[fdesc, 1.0, 1.0, 2.0, 2.0])
        .unwrap();
    let cdesc = d.invoke(Op::CreateConvDesc, &[]).unwrap()[0];
    d.invoke(Op::SetConvDesc, &[cdesc, 0.0, 0.0, 1.0, 1.0])
        .unwrap();

    let hx = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    let hw = alloc(&mut d, &[1.0, 1.0, 1.0, 1.0]);
    let hy = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::ConvForward,
        &[
            ctx, 1.0, bdesc, hx, 0.0, fdesc, hw, 0.0, cdesc, 1.0, 0.0, 0.0, 0.0, 0.0, tdesc, hy,
            0.0,
        ],
    )
    .unwrap();
    assert_eq!(read(&mut d, hy), vec![12.0, 16.0, 24.0, 28.0]);

    // bias gradient accumulates every top element
    let hdy = alloc(&mut d, &[1.0, 1.0, 1.0, 1.0]);
    let hdb = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    d.invoke(
        Op::ConvBackwardBias,
        &[ctx, 1.0, tdesc, hdy, 0.0, 0.0, bias_desc, hdb, 0.0],
    )
    .unwrap();
    assert_eq!(read(&mut d, hdb), vec![4.0]);

    // filter gradient for an all-ones upstream equals window sums
    let hdw = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::ConvBackwardFilter,
        &[
            ctx, 1.0, bdesc, hx, 0.0, tdesc, hdy, 0.0, cdesc, 1.0, 0.0, 0.0, 0.0, 0.0, fdesc, hdw,
            0.0,
        ],
    )
    .unwrap();
    assert_eq!(read(&mut d, hdw), vec![12.0, 16.0, 24.0, 28.0]);

    // data gradient spreads each upstream value over its window
    let hdx = d.invoke(Op::AllocMemory, &[9.0]).unwrap()[0];
    d.invoke(
        Op::ConvBackwardData,
        &[
            ctx, 1.0, fdesc, hw, 0.0, tdesc, hdy, 0.0, cdesc, 1.0, 0.0, 0.0, 0.0, 0.0, bdesc, hdx,
            0.0,
        ],
    )
    .unwrap();
    assert_eq!(
        read(&mut d, hdx),
        vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
    );
}

#[test]
fn conv_rejects_mismatched_top_descriptor() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let bdesc = tensor(&mut d, 1.0, 1.0, 3.0, 3.0);
    let wrong_top = tensor(&mut d, 1.0, 1.0, 3.0, 3.0);
    let fdesc = d.invoke(Op::CreateFilterDesc, &[]).unwrap()[0];
    d.invoke(Op::SetFilterDesc, &[fdesc, 1.0, 1.0, 2.0, 2.0])
        .unwrap();
    let cdesc = d.invoke(Op::CreateConvDesc, &[]).unwrap()[0];
    d.invoke(Op::SetConvDesc, &[cdesc, 0.0, 0.0, 1.0, 1.0])
        .unwrap();
    let err = d
        .invoke(
            Op::GetConvInfo,
            &[ctx, bdesc, fdesc, cdesc, wrong_top, 0.0],
        )
        .unwrap_err();
    assert_eq!(err.code(), 10);
}

#[test]
fn pooling_forward_backward_via_descriptors() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let bdesc = tensor(&mut d, 1.0, 1.0, 2.0, 2.0);
    let tdesc = tensor(&mut d, 1.0, 1.0, 1.0, 1.0);
    let p = d.invoke(Op::CreatePoolingDesc, &[]).unwrap()[0];
    d.invoke(Op::SetPoolingDesc, &[p, 0.0, 2.0, 2.0, 0.0, 0.0, 1.0, 1.0])
        .unwrap();
    let hx = alloc(&mut d, &[1.0, 9.0, 2.0, 3.0]);
    let hy = d.invoke(Op::AllocMemory, &[1.0]).unwrap()[0];
    d.invoke(
        Op::PoolingForward,
        &[ctx, p, 1.0, bdesc, hx, 0.0, tdesc, hy],
    )
    .unwrap();
    assert_eq!(read(&mut d, hy), vec![9.0]);

    let hdy = alloc(&mut d, &[5.0]);
    let hdx = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::PoolingBackward,
        &[ctx, p, 1.0, tdesc, hy, tdesc, hdy, bdesc, hx, 0.0, bdesc, hdx],
    )
    .unwrap();
    assert_eq!(read(&mut d, hdx), vec![0.0, 5.0, 0.0, 0.0]);
}

#[test]
fn tanh_sigmoid_backward_via_descriptors() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let desc = tensor(&mut d, 1.0, 1.0, 1.0, 2.0);
    let hx = alloc(&mut d, &[0.5, -0.5]);
    let hy = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(Op::TanhForward, &[ctx, 1.0, desc, hx, 0.0, desc, hy])
        .unwrap();
    let y = read(&mut d, hy);
    assert!((y[0] - 0.5_f32.tanh()).abs() < 1e-6);

    let hdy = alloc(&mut d, &[1.0, 1.0]);
    let hdx = d.invoke(Op::AllocMemory, &[2.0]).unwrap()[0];
    d.invoke(
        Op::TanhBackward,
        &[ctx, 1.0, desc, hy, desc, hdy, desc, hx, 0.0, desc, hdx],
    )
    .unwrap();
    let dx = read(&mut d, hdx);
    assert!((dx[0] - (1.0 - y[0] * y[0])).abs() < 1e-6);

    d.invoke(Op::SigmoidForward, &[ctx, 1.0, desc, hx, 0.0, desc, hy])
        .unwrap();
    let s = read(&mut d, hy);
    d.invoke(
        Op::SigmoidBackward,
        &[ctx, 1.0, desc, hy, desc, hdy, desc, hx, 0.0, desc, hdx],
    )
    .unwrap();
    let ds = read(&mut d, hdx);
    assert!((ds[0] - s[0] * (1.0 - s[0])).abs() < 1e-6);
}

#[test]
fn alpha_beta_scaling_blends_output() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let desc = tensor(&mut d, 1.0, 1.0, 1.0, 2.0);
    let hx = alloc(&mut d, &[1.0, -1.0]);
    let hy = alloc(&mut d, &[100.0, 100.0]);
    // y = 2 * relu(x) + 0.5 * y
    d.invoke(Op::ReluForward, &[ctx, 2.0, desc, hx, 0.5, desc, hy])
        .unwrap();
    assert_eq!(read(&mut d, hy), vec![52.0, 50.0]);
}

#[test]
fn lcn_forward_backward_shapes() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let desc = tensor(&mut d, 1.0, 4.0, 1.0, 1.0);
    let lrn = d.invoke(Op::CreateLrnDesc, &[]).unwrap()[0];
    d.invoke(Op::SetLrnDesc, &[lrn, 3.0, 1.0, 0.5, 1.0]).unwrap();
    let hx = alloc(&mut d, &[1.0, 2.0, 3.0, 4.0]);
    let ht1 = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    let ht2 = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    let hy = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::LcnForwardCC,
        &[ctx, lrn, 1.0, desc, hx, ht1, ht2, 0.0, desc, hy],
    )
    .unwrap();
    // centered data lands in temp1 and sums to roughly zero per window
    let centered = read(&mut d, ht1);
    assert!(centered[0] < 0.0);
    assert!(centered[3] > 0.0);
    let var = read(&mut d, ht2);
    assert!(var.iter().all(|&v| v >= 0.0));

    let hdy = alloc(&mut d, &[1.0, 0.0, 0.0, -1.0]);
    let hdx = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(
        Op::LcnBackwardCC,
        &[ctx, lrn, 1.0, desc, hx, hdy, ht1, ht2, 0.0, desc, hdx],
    )
    .unwrap();
    assert!(read(&mut d, hdx).iter().all(|v| v.is_finite()));
}

#[test]
fn lrn_backward_via_descriptors() {
    let mut d = dev();
    let ctx = d.invoke(Op::CreateCudnn, &[]).unwrap()[0];
    let desc = tensor(&mut d, 1.0, 3.0, 1.0, 1.0);
    let lrn = d.invoke(Op::CreateLrnDesc, &[]).unwrap()[0];
    d.invoke(Op::SetLrnDesc, &[lrn, 3.0, 1e-4, 0.75, 1.0])
        .unwrap();
    let hx = alloc(&mut d, &[1.0, 2.0, 3.0]);
    let hy = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    d.invoke(Op::LrnForwardCC, &[ctx, lrn, 1.0, desc, hx, 0.0, desc, hy])
        .unwrap();
    let hdy = alloc(&mut d, &[1.0, 1.0, 1.0]);
    let hdx = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    d.invoke(
        Op::LrnBackwardCC,
        &[ctx, lrn, 1.0, desc, hy, desc, hdy, desc, hx, 0.0, desc, hdx],
    )
    .unwrap();
    // with tiny alpha the normalization is near-identity
    for v in read(&mut d, hdx) {
        assert!((v - 1.0).abs() < 0.01);
    }
}

#[test]
fn descriptor_double_free_is_invalid_handle() {
    let mut d = dev();
    for (create, free) in [
        (Op::CreateTensorDesc, Op::FreeTensorDesc),
        (Op::CreateFilterDesc, Op::FreeFilterDesc),
        (Op::CreateConvDesc, Op::FreeConvDesc),
        (Op::CreatePoolingDesc, Op::FreePoolingDesc),
        (Op::CreateDropoutDesc, Op::FreeDropoutDesc),
        (Op::CreateLrnDesc, Op::FreeLrnDesc),
        (Op::CreateCudnn, Op::FreeCudnn),
    ] {
        let h = d.invoke(create, &[]).unwrap()[0];
        d.invoke(free, &[h]).unwrap();
        assert_eq!(
            d.invoke(free, &[h]).unwrap_err().code(),
            5,
            "{}",
            create.name()
        );
    }
}
