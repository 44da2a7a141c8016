//! Catalogue-wide marshalling properties.
//!
//! Every operation must reject argument counts outside its declared bounds
//! with the out-of-range status code, without reaching its delegate; wire
//! ids must round-trip; and reply shapes must match their declared form.

use despachar::{Device, Op};
use proptest::prelude::*;

fn fresh() -> Device<f32> {
    Device::host()
}

#[test]
fn below_min_is_rejected_without_side_effects() {
    let mut d = fresh();
    let baseline = d.live_handles();
    for &op in Op::ALL {
        let arity = op.arity();
        if arity.min == 0 {
            continue;
        }
        let args = vec![0.0_f32; arity.min - 1];
        let err = d
            .invoke(op, &args)
            .expect_err(&format!("{} accepted {} args", op.name(), arity.min - 1));
        assert_eq!(err.code(), 2, "{} returned {}", op.name(), err.code());
        assert_eq!(
            d.live_handles(),
            baseline,
            "{} mutated state on a rejected call",
            op.name()
        );
    }
}

#[test]
fn above_max_is_rejected_without_side_effects() {
    let mut d = fresh();
    let baseline = d.live_handles();
    for &op in Op::ALL {
        let arity = op.arity();
        if arity.max == usize::MAX {
            continue;
        }
        let args = vec![0.0_f32; arity.max + 1];
        let err = d
            .invoke(op, &args)
            .expect_err(&format!("{} accepted {} args", op.name(), arity.max + 1));
        assert_eq!(err.code(), 2, "{} returned {}", op.name(), err.code());
        assert_eq!(
            d.live_handles(),
            baseline,
            "{} mutated state on a rejected call",
            op.name()
        );
    }
}

#[test]
fn raw_surface_uses_status_codes() {
    let mut d = fresh();
    for &op in Op::ALL {
        let arity = op.arity();
        if arity.min == 0 {
            continue;
        }
        let (code, out) = d.invoke_raw(op.id(), &vec![0.0_f32; arity.min - 1]);
        assert_eq!(code, 2, "{}", op.name());
        assert!(out.is_empty(), "{}", op.name());
    }
}

#[test]
fn wire_ids_round_trip_the_catalogue() {
    for &op in Op::ALL {
        assert_eq!(Op::from_id(op.id()).unwrap(), op);
    }
    assert_eq!(Op::from_id(0).unwrap_err().code(), 1);
}

#[test]
fn handle_returning_ops_reply_with_one_element() {
    let mut d = fresh();
    for op in [
        Op::AllocMemory,
        Op::AllocHostBuffer,
        Op::CreateStream,
        Op::CreateTensorDesc,
        Op::CreateFilterDesc,
        Op::CreateConvDesc,
        Op::CreatePoolingDesc,
        Op::CreateDropoutDesc,
        Op::CreateLrnDesc,
        Op::CreateCudnn,
    ] {
        let args: Vec<f32> = if op.arity().min > 0 { vec![8.0] } else { vec![] };
        let out = d.invoke(op, &args).unwrap();
        assert_eq!(out.len(), 1, "{}", op.name());
        assert!(out[0] >= 1.0, "{} returned handle {}", op.name(), out[0]);
    }
}

#[test]
fn scalar_and_fixed_vector_reply_shapes() {
    let mut d = fresh();
    let h = d.invoke(Op::AllocMemory, &[4.0]).unwrap()[0];
    d.invoke(Op::SetMemory, &[h, 4.0, 1.0, -2.0, 3.0, -4.0])
        .unwrap();
    assert_eq!(d.invoke(Op::Asum, &[4.0, h]).unwrap().len(), 1);
    assert_eq!(d.invoke(Op::GetDevice, &[]).unwrap().len(), 1);
    assert_eq!(d.invoke(Op::MinMaxVal, &[4.0, h]).unwrap().len(), 2);
    assert_eq!(d.invoke(Op::GetDeviceMemory, &[0.0]).unwrap().len(), 4);
    assert_eq!(d.invoke(Op::CreateMemoryTest, &[0.001]).unwrap().len(), 5);
}

#[test]
fn double_width_facade_behaves_identically() {
    let mut d: Device<f64> = Device::host();
    let h = d.invoke(Op::AllocMemory, &[3.0]).unwrap()[0];
    d.invoke(Op::SetMemory, &[h, 3.0, 1.5, 2.5, 3.0]).unwrap();
    assert_eq!(d.invoke(Op::Asum, &[3.0, h]).unwrap(), vec![7.0]);
    let err = d.invoke(Op::Asum, &[]).unwrap_err();
    assert_eq!(err.code(), 2);
}

proptest! {
    #[test]
    fn random_out_of_bounds_counts_always_code_two(
        op_idx in 0..Op::ALL.len(),
        extra in 1_usize..16,
    ) {
        let op = Op::ALL[op_idx];
        let arity = op.arity();
        let mut d = fresh();
        if arity.min > 0 {
            let args = vec![0.0_f32; arity.min.saturating_sub(extra).min(arity.min - 1)];
            let err = d.invoke(op, &args).unwrap_err();
            prop_assert_eq!(err.code(), 2);
        }
        if arity.max != usize::MAX {
            let args = vec![0.0_f32; arity.max + extra];
            let err = d.invoke(op, &args).unwrap_err();
            prop_assert_eq!(err.code(), 2);
        }
    }

    #[test]
    fn exact_pair_arities_reject_interior_counts(n in 6_usize..9) {
        let mut d = fresh();
        let t = d.invoke(Op::CreateTensorDesc, &[]).unwrap()[0];
        let mut args = vec![t];
        args.extend(std::iter::repeat(1.0).take(n - 1));
        let err = d.invoke(Op::SetTensorDesc, &args).unwrap_err();
        prop_assert_eq!(err.code(), 2);
    }
}
