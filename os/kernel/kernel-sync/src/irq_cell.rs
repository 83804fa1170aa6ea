use crate::IrqGuard;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// The cell was entered again while a [`IrqCell::try_with`] closure was
/// still running on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("interrupt-masked cell entered recursively")]
pub struct Reentered;

/// Global state that is only touched with interrupts masked.
///
/// On a single CPU, masking interrupts is enough to make the closure passed
/// to [`try_with`](Self::try_with) the only code touching the value. A busy
/// flag turns accidental recursion (a closure calling back into the same
/// cell) into a [`Reentered`] error instead of aliasing `&mut T`.
///
/// ```
/// use kernel_sync::IrqCell;
///
/// static TICKS: IrqCell<u64> = IrqCell::new(0);
///
/// let now = TICKS.try_with(|t| { *t += 1; *t }).unwrap();
/// assert_eq!(now, 1);
/// ```
pub struct IrqCell<T> {
    busy: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: every access goes through `try_with`, which masks interrupts and
// refuses re-entry, so no two `&mut T` exist at once on the single CPU.
unsafe impl<T: Send> Sync for IrqCell<T> {}
unsafe impl<T: Send> Send for IrqCell<T> {}

impl<T> IrqCell<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            busy: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` on the value with interrupts masked.
    ///
    /// # Errors
    /// [`Reentered`] if called from inside another `try_with` on this cell.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, Reentered> {
        let _irq = IrqGuard::new();
        if self.busy.swap(true, Ordering::Acquire) {
            return Err(Reentered);
        }
        // SAFETY: interrupts are masked and the busy flag was clear.
        let result = f(unsafe { &mut *self.value.get() });
        self.busy.store(false, Ordering::Release);
        Ok(result)
    }

    /// Direct access when the cell is exclusively borrowed.
    pub const fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}
