//! Interrupt generation and recognition.
//!
//! After every instruction, the simulator flushes all pending interrupts
//! and then runs each peripheral's update, which re-signals whatever sources
//! are still asserted. At the next instruction boundary, [`InterruptController::next_int`]
//! resolves which of the pending sources (if any) is taken.

use super::regs::RegFile;

macro_rules! int_vect {
    ($Type:ident, {$($name:ident = $value:literal => $vector:literal),+ $(,)?}) => {
        /// An interrupt source, numbered from highest (XIRQ) to lowest (SCI) fixed priority.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $Type {
            $(
                #[allow(missing_docs)]
                $name = $value
            ),+
        }
        impl $Type {
            /// The address of this source's interrupt vector.
            pub fn vector(self) -> u16 {
                match self {
                    $(Self::$name => $vector),+
                }
            }
        }
        impl TryFrom<u8> for $Type {
            type Error = ();

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$name)),+,
                    _ => Err(())
                }
            }
        }
    }
}
int_vect!(IntSource, {
    Xirq = 1  => 0xFFF4,
    Irq  = 2  => 0xFFF2,
    Rti  = 3  => 0xFFF0,
    Ic1  = 4  => 0xFFEE,
    Ic2  = 5  => 0xFFEC,
    Ic3  = 6  => 0xFFEA,
    Oc1  = 7  => 0xFFE8,
    Oc2  = 8  => 0xFFE6,
    Oc3  = 9  => 0xFFE4,
    Oc4  = 10 => 0xFFE2,
    Oc5  = 11 => 0xFFE0,
    Tov  = 12 => 0xFFDE,
    Paov = 13 => 0xFFDC,
    Pai  = 14 => 0xFFDA,
    Spi  = 15 => 0xFFD8,
    Sci  = 16 => 0xFFD6,
});
impl IntSource {
    /// Input capture 4 shares its source (and vector) with output compare 5.
    pub const IC4: IntSource = IntSource::Oc5;
}

/// The source promoted to highest maskable priority for each value of HPRIO's low nibble.
const PROMOTIONS: [IntSource; 16] = {
    use IntSource::*;
    [
        Tov, Paov, Pai, Spi, Sci, Irq, Irq, Rti,
        Ic1, Ic2, Ic3, Oc1, Oc2, Oc3, Oc4, Oc5,
    ]
};

/// The set of pending interrupt sources.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InterruptController {
    // bit n is source n
    pending: u32,
}
impl InterruptController {
    /// Creates a controller with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a source as pending. Signalling a pending source has no further effect.
    pub fn signal(&mut self, src: IntSource) {
        self.pending |= 1 << src as u32;
    }
    /// Clears every pending source.
    pub fn flush(&mut self) {
        self.pending = 0;
    }
    /// Whether a source is pending.
    pub fn is_pending(&self, src: IntSource) -> bool {
        self.pending & (1 << src as u32) != 0
    }

    /// Resolves the highest priority pending source and takes it, if it is not masked.
    ///
    /// XIRQ wins over everything. Otherwise, the source promoted by `hprio`
    /// wins if pending, and failing that the lowest-numbered pending source.
    /// If the winner is masked (by CC.X for XIRQ, CC.I for the rest),
    /// nothing is taken and the winner stays pending.
    pub fn next_int(&mut self, hprio: u8, regs: &RegFile) -> Option<IntSource> {
        if self.pending == 0 { return None };

        let promoted = PROMOTIONS[usize::from(hprio & 0x0F)];
        let winner = if self.is_pending(IntSource::Xirq) {
            IntSource::Xirq
        } else if self.is_pending(promoted) {
            promoted
        } else {
            IntSource::try_from(self.pending.trailing_zeros() as u8).ok()?
        };

        let masked = match winner {
            IntSource::Xirq => regs.is_x_set(),
            _ => regs.is_i_set(),
        };
        if masked { return None };

        self.pending &= !(1 << winner as u32);
        Some(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unmasked() -> RegFile {
        let mut regs = RegFile::new();
        regs.set_cc(0x00);
        regs
    }

    #[test]
    fn vectors() {
        assert_eq!(IntSource::Xirq.vector(), 0xFFF4);
        assert_eq!(IntSource::IC4.vector(), 0xFFE0);
        assert_eq!(IntSource::Sci.vector(), 0xFFD6);
        assert_eq!(IntSource::try_from(16), Ok(IntSource::Sci));
        assert_eq!(IntSource::try_from(0), Err(()));
        assert_eq!(IntSource::try_from(17), Err(()));
    }

    #[test]
    fn xirq_beats_irq() {
        let mut ints = InterruptController::new();
        ints.signal(IntSource::Irq);
        ints.signal(IntSource::Xirq);
        let regs = unmasked();
        assert_eq!(ints.next_int(0x06, &regs), Some(IntSource::Xirq));
        assert_eq!(ints.next_int(0x06, &regs), Some(IntSource::Irq));
        assert_eq!(ints.next_int(0x06, &regs), None);
    }

    #[test]
    fn promotion() {
        let mut ints = InterruptController::new();
        ints.signal(IntSource::Irq);
        ints.signal(IntSource::Oc2);
        let regs = unmasked();
        // HPRIO = 0x0C promotes OC2
        assert_eq!(ints.next_int(0x0C, &regs), Some(IntSource::Oc2));
        assert_eq!(ints.next_int(0x0C, &regs), Some(IntSource::Irq));
    }

    #[test]
    fn masking() {
        let mut ints = InterruptController::new();
        let mut regs = RegFile::new(); // X and I set
        ints.signal(IntSource::Rti);
        ints.signal(IntSource::Xirq);
        assert_eq!(ints.next_int(0x06, &regs), None);

        regs.set_cc(0x10);
        assert_eq!(ints.next_int(0x06, &regs), Some(IntSource::Xirq));
        // RTI is the winner now, but it is masked by I
        assert_eq!(ints.next_int(0x06, &regs), None);
        assert!(ints.is_pending(IntSource::Rti));

        regs.set_cc(0x00);
        assert_eq!(ints.next_int(0x06, &regs), Some(IntSource::Rti));
    }

    #[test]
    fn idempotence() {
        let mut ints = InterruptController::new();
        ints.flush();
        assert_eq!(ints, InterruptController::new());

        ints.signal(IntSource::Tov);
        ints.signal(IntSource::Tov);
        let regs = unmasked();
        assert_eq!(ints.next_int(0x06, &regs), Some(IntSource::Tov));
        assert_eq!(ints.next_int(0x06, &regs), None);

        ints.signal(IntSource::Pai);
        ints.flush();
        assert_eq!(ints.next_int(0x06, &regs), None);
    }
}
