//! Two BMC cards wired to each other's CFAMs, in memory.
//!
//! Each board sees its own CFAM on one FSI link and its sibling's on the
//! other, the same way the real backplane is cabled.

use std::cell::RefCell;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use cfam_common::access::DEFAULT_SYSFS_ROOT;
use cfam_common::registers::NUM_SCRATCH_PAD_REGS;
use cfam_common::{
    BmcState, CfamError, Publisher, Result, Role, ScratchPadReg, SiblingView, StateProvider, SysFs,
};

pub const CARD_A: usize = 0;
pub const CARD_B: usize = 1;

#[derive(Debug, Clone, Default)]
struct Card {
    regs: [u32; NUM_SCRATCH_PAD_REGS],
    unbound: bool,
    read_failures: usize,
    write_failures: usize,
    reads: usize,
    writes: usize,
}

/// The shared cards. Clones share the same cards.
#[derive(Debug, Clone)]
pub struct Backplane {
    cards: Rc<RefCell<Vec<Card>>>,
}

impl Backplane {
    pub fn new(num_cards: usize) -> Self {
        Self {
            cards: Rc::new(RefCell::new(vec![Card::default(); num_cards])),
        }
    }

    /// Two cards, both bound, all registers zero.
    pub fn pair() -> Self {
        Self::new(2)
    }

    /// The view from a board with its own CFAM on link 0 and the other
    /// card's on link 1.
    pub fn sysfs_for(&self, card: usize) -> SimSysFs {
        let other = if card == CARD_A { CARD_B } else { CARD_A };
        self.sysfs(vec![(0, card), (1, other)])
    }

    /// A view with an explicit FSI link to card table.
    pub fn sysfs(&self, links: Vec<(usize, usize)>) -> SimSysFs {
        SimSysFs {
            backplane: self.clone(),
            root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            links,
        }
    }

    fn with_card<T>(&self, card: usize, f: impl FnOnce(&mut Card) -> T) -> T {
        f(&mut self.cards.borrow_mut()[card])
    }

    pub fn set_reg(&self, card: usize, reg: ScratchPadReg, value: u32) {
        self.with_card(card, |c| c.regs[reg.index()] = value);
    }

    pub fn reg(&self, card: usize, reg: ScratchPadReg) -> u32 {
        self.with_card(card, |c| c.regs[reg.index()])
    }

    /// Removes the card's register files, as when the FSI driver unbinds.
    pub fn unbind(&self, card: usize) {
        self.with_card(card, |c| c.unbound = true);
    }

    pub fn bind(&self, card: usize) {
        self.with_card(card, |c| c.unbound = false);
    }

    pub fn fail_next_reads(&self, card: usize, count: usize) {
        self.with_card(card, |c| c.read_failures = count);
    }

    pub fn fail_next_writes(&self, card: usize, count: usize) {
        self.with_card(card, |c| c.write_failures = count);
    }

    pub fn reads(&self, card: usize) -> usize {
        self.with_card(card, |c| c.reads)
    }

    pub fn writes(&self, card: usize) -> usize {
        self.with_card(card, |c| c.writes)
    }
}

/// One board's sysfs view of the backplane.
#[derive(Debug, Clone)]
pub struct SimSysFs {
    backplane: Backplane,
    root: PathBuf,
    links: Vec<(usize, usize)>,
}

impl SimSysFs {
    /// Maps `{root}/fsi{link}/slave@00:00/scratchN` to a card and register.
    fn resolve(&self, file: &Path) -> Option<(usize, ScratchPadReg)> {
        let rest = file.strip_prefix(&self.root).ok()?;
        let mut parts = rest.components().map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        });

        let link: usize = parts.next()??.strip_prefix("fsi")?.parse().ok()?;
        if parts.next()?? != "slave@00:00" {
            return None;
        }
        let reg = ScratchPadReg::from_file_name(parts.next()??)?;
        if parts.next().is_some() {
            return None;
        }

        let card = self.links.iter().find(|(l, _)| *l == link)?.1;
        Some((card, reg))
    }

    fn bound_card(&self, file: &Path) -> Result<(usize, ScratchPadReg)> {
        match self.resolve(file) {
            Some((card, reg)) if self.backplane.with_card(card, |c| !c.unbound) => Ok((card, reg)),
            _ => Err(CfamError::NotFound {
                path: file.to_path_buf(),
            }),
        }
    }
}

fn injected(file: &Path) -> CfamError {
    CfamError::Io {
        path: file.to_path_buf(),
        source: io::Error::other("injected failure"),
    }
}

impl SysFs for SimSysFs {
    fn read(&self, file: &Path) -> Result<u32> {
        let (card, reg) = self.bound_card(file)?;
        self.backplane.with_card(card, |c| {
            c.reads += 1;
            if c.read_failures > 0 {
                c.read_failures -= 1;
                debug!(card, %reg, "injecting read failure");
                return Err(injected(file));
            }
            Ok(c.regs[reg.index()])
        })
    }

    fn write(&self, file: &Path, value: u32) -> Result<()> {
        let (card, reg) = self.bound_card(file)?;
        self.backplane.with_card(card, |c| {
            c.writes += 1;
            if c.write_failures > 0 {
                c.write_failures -= 1;
                debug!(card, %reg, "injecting write failure");
                return Err(injected(file));
            }
            c.regs[reg.index()] = value;
            Ok(())
        })
    }

    fn exists(&self, file: &Path) -> bool {
        self.bound_card(file).is_ok()
    }
}

/// What a `RecordingPublisher` has seen.
#[derive(Debug, Default)]
pub struct PublishLog {
    pub current: Option<SiblingView>,
    pub publishes: usize,
    pub creates: usize,
    pub retracts: usize,
}

/// Keeps the published view in memory. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    log: Rc<RefCell<PublishLog>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SiblingView> {
        self.log.borrow().current.clone()
    }

    pub fn publishes(&self) -> usize {
        self.log.borrow().publishes
    }

    pub fn creates(&self) -> usize {
        self.log.borrow().creates
    }

    pub fn retracts(&self) -> usize {
        self.log.borrow().retracts
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&mut self, view: &SiblingView, created: bool) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.current = Some(view.clone());
        log.publishes += 1;
        if created {
            log.creates += 1;
        }
        Ok(())
    }

    fn retract(&mut self) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.current = None;
        log.retracts += 1;
        Ok(())
    }
}

/// A state provider with fixed answers. `None` means not available.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    pub bmc_state: Option<BmcState>,
    pub redundancy: Option<(Role, bool)>,
}

impl StateProvider for ScriptedProvider {
    fn bmc_state(&mut self) -> Result<BmcState> {
        self.bmc_state
            .ok_or_else(|| CfamError::ProviderUnavailable("BMC state".into()))
    }

    fn redundancy_props(&mut self) -> Result<(Role, bool)> {
        self.redundancy
            .ok_or_else(|| CfamError::ProviderUnavailable("redundancy".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(link: usize, n: usize) -> PathBuf {
        PathBuf::from(format!("{DEFAULT_SYSFS_ROOT}/fsi{link}/slave@00:00/scratch{n}"))
    }

    #[test]
    fn test_cross_wiring() {
        let backplane = Backplane::pair();
        let a = backplane.sysfs_for(CARD_A);
        let b = backplane.sysfs_for(CARD_B);

        a.write(&scratch(0, 1), 0x1111_1111).unwrap();
        b.write(&scratch(0, 2), 0x2222_2222).unwrap();

        assert_eq!(b.read(&scratch(1, 1)).unwrap(), 0x1111_1111);
        assert_eq!(a.read(&scratch(1, 2)).unwrap(), 0x2222_2222);
        assert_eq!(backplane.reg(CARD_A, ScratchPadReg::One), 0x1111_1111);
    }

    #[test]
    fn test_bad_paths() {
        let backplane = Backplane::pair();
        let a = backplane.sysfs_for(CARD_A);

        assert!(!a.exists(&scratch(2, 1)));
        assert!(!a.exists(&scratch(0, 5)));
        assert!(!a.exists(Path::new("/sys/class/fsi-master/fsi0/scratch1")));
        assert!(matches!(a.read(&scratch(3, 1)), Err(CfamError::NotFound { .. })));
    }

    #[test]
    fn test_unbind_and_failures() {
        let backplane = Backplane::pair();
        let a = backplane.sysfs_for(CARD_A);

        backplane.unbind(CARD_B);
        assert!(!a.exists(&scratch(1, 1)));
        assert!(matches!(a.read(&scratch(1, 1)), Err(CfamError::NotFound { .. })));
        backplane.bind(CARD_B);
        assert!(a.exists(&scratch(1, 1)));

        backplane.fail_next_reads(CARD_B, 1);
        assert!(a.read(&scratch(1, 1)).is_err());
        assert!(a.read(&scratch(1, 1)).is_ok());
        assert_eq!(backplane.reads(CARD_B), 2);

        backplane.fail_next_writes(CARD_A, 1);
        assert!(a.write(&scratch(0, 1), 1).is_err());
        assert_eq!(backplane.reg(CARD_A, ScratchPadReg::One), 0);
    }
}
