//! Math kernel layer.
//!
//! Typed reference kernels over buffers in the memory bank. Each function is
//! the single delegate behind one dispatch operation; handles are resolved
//! here and nowhere else. Kernels tolerate aliased input/output handles the
//! way device kernels do, by staging through host copies.

pub mod elementwise;
pub mod layers;
pub mod matrix;
pub mod random;
pub mod tsne;

use crate::element::Element;
use crate::error::Result;
use crate::handle::Handle;
use crate::memory::MemoryBank;

/// y[i] = f(x[i]) over `n` elements with per-buffer offsets.
pub(crate) fn unary<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    hx: Handle,
    x_off: usize,
    hy: Handle,
    y_off: usize,
    f: impl Fn(T) -> T,
) -> Result<()> {
    let x = mem.read(hx, x_off, n)?;
    let y: Vec<T> = x.into_iter().map(f).collect();
    mem.write(hy, y_off, &y)
}

/// y[i] = f(a[i], b[i]) over `n` elements.
pub(crate) fn binary<T: Element>(
    mem: &mut MemoryBank<T>,
    n: usize,
    ha: Handle,
    hb: Handle,
    hy: Handle,
    f: impl Fn(T, T) -> T,
) -> Result<()> {
    let a = mem.read(ha, 0, n)?;
    let b = mem.read(hb, 0, n)?;
    let y: Vec<T> = a.into_iter().zip(b).map(|(p, q)| f(p, q)).collect();
    mem.write(hy, 0, &y)
}

/// Fold over `n` elements of one buffer.
pub(crate) fn fold<T: Element, A>(
    mem: &MemoryBank<T>,
    n: usize,
    hx: Handle,
    x_off: usize,
    init: A,
    f: impl Fn(A, T) -> A,
) -> Result<A> {
    let x = mem.read(hx, x_off, n)?;
    Ok(x.into_iter().fold(init, f))
}
