//! Utilities to debug simulation.
//!
//! The key types here are:
//! - [`Breakpoint`]: halts a run when the PC reaches an address (optionally, only on some condition).
//! - [`VirtualFunction`]: replaces the subroutine at an address with a host function.
//! - [`BranchForce`]: overrides the decision of the first branch of a run.

use std::fmt::Write;

use super::regs::Reg;
use super::{SimErr, Simulator};

/// A condition deciding whether a breakpoint is allowed to count a visit.
///
/// Conditions see the simulator as it is before the instruction at the breakpoint executes.
pub type Predicate = Box<dyn FnMut(&Simulator) -> Result<bool, SimErr> + Send>;

/// A breakpoint on an address.
///
/// Every time the PC reaches the address (except at the start of a run),
/// the breakpoint's predicate is consulted. If it allows the visit,
/// the hit count is decremented and the breakpoint fires once it reaches zero.
///
/// Hit counts are restored to [`Breakpoint::base_count`] at the start of every run.
pub struct Breakpoint {
    /// The address to break at.
    pub addr: u16,
    /// The text reported when this breakpoint halts a run.
    pub text: String,
    /// Visits remaining before this breakpoint fires.
    pub count: u32,
    /// The hit count restored at the start of every run.
    pub base_count: u32,
    /// Whether this breakpoint is removed once it fires.
    pub autoremove: bool,
    pub(super) predicate: Option<Predicate>,
}
impl Breakpoint where Breakpoint: Send { /* assert Breakpoint is send */ }

impl Breakpoint {
    /// Creates a breakpoint which fires on the first visit to `addr`.
    pub fn new(addr: u16) -> Self {
        Self {
            addr,
            text: String::from("Unknown Breakpoint"),
            count: 1,
            base_count: 1,
            autoremove: false,
            predicate: None,
        }
    }

    /// Sets the text reported when this breakpoint fires.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
    /// Fires on the `n`th allowed visit instead of the first.
    pub fn with_count(mut self, n: u32) -> Self {
        self.count = n;
        self.base_count = n;
        self
    }
    /// Only counts visits that the predicate allows.
    ///
    /// An error from the predicate aborts the run.
    pub fn with_predicate(mut self, f: impl FnMut(&Simulator) -> Result<bool, SimErr> + Send + 'static) -> Self {
        self.predicate = Some(Box::new(f));
        self
    }
    /// Only counts visits where the register matches the comparator.
    pub fn when_reg(self, reg: Reg, cmp: Comparator) -> Self {
        self.with_predicate(move |sim| Ok(cmp.check(sim.regs.get(reg))))
    }
    /// Only counts visits where the byte at `addr` matches the comparator.
    pub fn when_mem(self, addr: u16, cmp: Comparator) -> Self {
        // do not trigger peripherals
        self.with_predicate(move |sim| Ok(cmp.check(sim.mem.raw().read_u8(addr).into())))
    }
    /// Removes this breakpoint once it fires.
    pub fn autoremove(mut self) -> Self {
        self.autoremove = true;
        self
    }

    /// Whether this breakpoint has a predicate.
    pub fn is_conditional(&self) -> bool {
        self.predicate.is_some()
    }

    /// Restores the hit count to its base value.
    pub fn restore_count(&mut self) {
        self.count = self.base_count;
    }

    /// Counts an allowed visit, returning whether the breakpoint fires.
    ///
    /// A breakpoint whose count is already zero never fires again
    /// until its count is restored.
    pub(super) fn count_down(&mut self) -> bool {
        match self.count {
            0 => false,
            _ => {
                self.count -= 1;
                self.count == 0
            }
        }
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Breakpoint")
            .field("addr", &self.addr)
            .field("text", &self.text)
            .field("count", &self.count)
            .field("base_count", &self.base_count)
            .field("autoremove", &self.autoremove)
            .field("conditional", &self.is_conditional())
            .finish()
    }
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:04X} {:?} ({}/{})", self.addr, self.text, self.count, self.base_count)?;
        if self.is_conditional() {
            f.write_str(" if")?;
        }
        if self.autoremove {
            f.write_char('*')?;
        }
        Ok(())
    }
}

/// Predicate checking whether the current value is equal to the value.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the desired value is less than the provided value.
    Lt(u16),
    /// Break if the desired value is equal to the provided value.
    Eq(u16),
    /// Break if the desired value is less than or equal to the provided value.
    Le(u16),
    /// Break if the desired value is greater than the provided value.
    Gt(u16),
    /// Break if the desired value is not equal to the provided value.
    Ne(u16),
    /// Break if the desired value is greater than or equal to the provided value.
    Ge(u16),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(&self, operand: u16) -> bool {
        match *self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => operand < r,
            Comparator::Eq(r)  => operand == r,
            Comparator::Le(r)  => operand <= r,
            Comparator::Gt(r)  => operand > r,
            Comparator::Ne(r)  => operand != r,
            Comparator::Ge(r)  => operand >= r,
            Comparator::Always => true,
        }
    }
}
impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Lt(r)  => write!(f, "< ${r:04X}"),
            Comparator::Eq(r)  => write!(f, "== ${r:04X}"),
            Comparator::Le(r)  => write!(f, "<= ${r:04X}"),
            Comparator::Gt(r)  => write!(f, "> ${r:04X}"),
            Comparator::Ne(r)  => write!(f, "!= ${r:04X}"),
            Comparator::Ge(r)  => write!(f, ">= ${r:04X}"),
            Comparator::Always => f.write_str("always"),
        }
    }
}

/// A host function standing in for the subroutine at an address.
pub type VirtualFn = Box<dyn FnMut(&mut Simulator) -> Result<(), SimErr> + Send>;

/// A subroutine implemented by the host.
///
/// When the PC reaches [`VirtualFunction::addr`], the function runs instead of the code there.
/// Afterwards, the simulator pulls a return address off the stack and jumps to it,
/// so the function must be entered the way a subroutine is (`JSR`/`BSR`).
pub struct VirtualFunction {
    /// The entry point.
    pub addr: u16,
    /// A description of the function.
    pub text: String,
    func: VirtualFn,
}
impl VirtualFunction {
    /// Creates a virtual function.
    pub fn new(addr: u16, text: impl Into<String>, func: impl FnMut(&mut Simulator) -> Result<(), SimErr> + Send + 'static) -> Self {
        Self { addr, text: text.into(), func: Box::new(func) }
    }

    pub(super) fn call(&mut self, sim: &mut Simulator) -> Result<(), SimErr> {
        (self.func)(sim)
    }
}
impl std::fmt::Debug for VirtualFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFunction")
            .field("addr", &self.addr)
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

/// Overrides the condition of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchForce {
    /// The branch is taken.
    Always,
    /// The branch is not taken.
    Never,
}
impl BranchForce {
    /// Decides a branch given its real condition and an optional override.
    pub fn decide(force: Option<BranchForce>, cond: bool) -> bool {
        match force {
            Some(BranchForce::Always) => true,
            Some(BranchForce::Never) => false,
            None => cond,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting() {
        let mut bp = Breakpoint::new(0xC010).with_count(3);
        assert!(!bp.count_down());
        assert!(!bp.count_down());
        assert!(bp.count_down());
        assert_eq!(bp.count, 0);
        // spent until restored
        assert!(!bp.count_down());
        bp.restore_count();
        assert_eq!(bp.count, 3);
    }

    #[test]
    fn defaults_and_display() {
        let bp = Breakpoint::new(0xC010);
        assert_eq!(bp.text, "Unknown Breakpoint");
        assert_eq!((bp.count, bp.base_count), (1, 1));
        assert!(!bp.autoremove && !bp.is_conditional());
        assert_eq!(bp.to_string(), "$C010 \"Unknown Breakpoint\" (1/1)");

        let bp = Breakpoint::new(0xFFFF)
            .with_text("CALL breakpoint")
            .autoremove()
            .when_reg(Reg::A, Comparator::Eq(4));
        assert_eq!(bp.to_string(), "$FFFF \"CALL breakpoint\" (1/1) if*");
    }

    #[test]
    fn comparators() {
        assert!(Comparator::Lt(5).check(4));
        assert!(!Comparator::Lt(5).check(5));
        assert!(Comparator::Ge(5).check(5));
        assert!(Comparator::Ne(5).check(6));
        assert!(!Comparator::Never.check(0));
        assert!(Comparator::Always.check(0));
        assert_eq!(Comparator::Le(0x1F).to_string(), "<= $001F");
    }

    #[test]
    fn branch_force() {
        assert!(BranchForce::decide(None, true));
        assert!(!BranchForce::decide(None, false));
        assert!(BranchForce::decide(Some(BranchForce::Always), false));
        assert!(!BranchForce::decide(Some(BranchForce::Never), true));
    }
}
