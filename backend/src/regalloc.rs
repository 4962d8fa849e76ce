//! Guest-to-host register allocation.
//!
//! Two fixed pools (general-purpose and vector) of 16 host slots
//! each. A slot caches one guest register; misses evict the
//! least-recently-bound slot, spilling its value to guest state.

use log::trace;
use vujit_core::{Pool, Result};

use crate::{EmitCx, HostAbi, HostCodeGen};

/// Host registers per pool.
pub const NUM_SLOTS: usize = 16;

/// Guest register id whose value is hardwired by the VU (vi0, vf0).
/// The dispatcher never writes it, and `flush` releases a slot bound
/// to it without write-back.
pub const HARDWIRED_GUEST: u8 = 0;

/// Bookkeeping for one host register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostSlot {
    /// Guest register cached here (meaningful only when `used`).
    pub guest: u8,
    pub used: bool,
    /// Never an allocation target while set.
    pub locked: bool,
    /// Allocation events since this slot was last bound.
    pub age: u32,
}

/// Result of binding a guest register to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The guest register was already cached in this slot.
    Hit(u8),
    /// Bound to a previously unused slot.
    Fresh(u8),
    /// Bound after evicting guest register `victim` from `slot`.
    Evicted { slot: u8, victim: u8 },
}

impl Binding {
    pub fn slot(self) -> u8 {
        match self {
            Binding::Hit(slot) | Binding::Fresh(slot) => slot,
            Binding::Evicted { slot, .. } => slot,
        }
    }
}

/// One register pool: pure slot bookkeeping, no code emission.
#[derive(Debug, Clone)]
pub struct RegPool {
    kind: Pool,
    slots: [HostSlot; NUM_SLOTS],
}

impl RegPool {
    pub fn new(kind: Pool) -> Self {
        Self {
            kind,
            slots: [HostSlot::default(); NUM_SLOTS],
        }
    }

    #[inline]
    pub fn kind(&self) -> Pool {
        self.kind
    }

    #[inline]
    pub fn slot(&self, idx: u8) -> &HostSlot {
        &self.slots[idx as usize]
    }

    #[inline]
    pub fn slots(&self) -> &[HostSlot] {
        &self.slots
    }

    /// Slot currently caching `guest`, if any.
    pub fn lookup(&self, guest: u8) -> Option<u8> {
        self.slots
            .iter()
            .position(|s| s.used && s.guest == guest)
            .map(|i| i as u8)
    }

    pub fn used_count(&self) -> usize {
        self.slots.iter().filter(|s| s.used).count()
    }

    /// Bind `guest` to a slot, evicting the oldest one if the pool
    /// is full. Only bookkeeping changes; the caller emits the
    /// spill for an evicted victim and any fill.
    pub fn bind(&mut self, guest: u8) -> Binding {
        if let Some(slot) = self.lookup(guest) {
            return Binding::Hit(slot);
        }

        for s in self.slots.iter_mut() {
            if s.used && !s.locked {
                s.age += 1;
            }
        }

        let slot = self.select();
        let prev = self.slots[slot as usize];
        self.slots[slot as usize] = HostSlot {
            guest,
            used: true,
            locked: false,
            age: 0,
        };

        if prev.used {
            Binding::Evicted {
                slot,
                victim: prev.guest,
            }
        } else {
            Binding::Fresh(slot)
        }
    }

    /// First unused unlocked slot, else the oldest used one.
    /// Ties go to the lower index.
    fn select(&self) -> u8 {
        let mut oldest: Option<(usize, u32)> = None;
        for (i, s) in self.slots.iter().enumerate() {
            if s.locked {
                continue;
            }
            if !s.used {
                return i as u8;
            }
            match oldest {
                Some((_, age)) if s.age <= age => {}
                _ => oldest = Some((i, s.age)),
            }
        }
        match oldest {
            Some((i, _)) => i as u8,
            None => panic!("{} register pool has no allocatable slot", self.kind),
        }
    }

    /// Mark a slot free. Its guest value must already be written back.
    pub fn release(&mut self, idx: u8) {
        let s = &mut self.slots[idx as usize];
        s.used = false;
        s.age = 0;
    }

    pub fn lock(&mut self, idx: u8) {
        let s = &mut self.slots[idx as usize];
        debug_assert!(!s.used, "locking a bound slot");
        s.locked = true;
    }

    pub fn unlock(&mut self, idx: u8) {
        self.slots[idx as usize].locked = false;
    }

    /// All slots unused, unlocked, age 0.
    pub fn clear(&mut self) {
        self.slots = [HostSlot::default(); NUM_SLOTS];
    }
}

/// Register allocator for one emulated unit.
#[derive(Debug, Clone)]
pub struct RegAlloc {
    int: RegPool,
    vector: RegPool,
}

impl RegAlloc {
    pub fn new(abi: &HostAbi) -> Self {
        let mut alloc = Self {
            int: RegPool::new(Pool::Int),
            vector: RegPool::new(Pool::Vector),
        };
        alloc.reset(abi);
        alloc
    }

    /// Cold state: nothing bound, only the ABI's reserved
    /// integer registers locked.
    pub fn reset(&mut self, abi: &HostAbi) {
        self.int.clear();
        self.vector.clear();
        for &reg in abi.locked_int {
            self.int.lock(reg);
        }
    }

    pub fn pool(&self, pool: Pool) -> &RegPool {
        match pool {
            Pool::Int => &self.int,
            Pool::Vector => &self.vector,
        }
    }

    pub fn pool_mut(&mut self, pool: Pool) -> &mut RegPool {
        match pool {
            Pool::Int => &mut self.int,
            Pool::Vector => &mut self.vector,
        }
    }

    /// Whether no slot in either pool holds a guest register.
    pub fn is_cold(&self) -> bool {
        self.int.used_count() == 0 && self.vector.used_count() == 0
    }

    /// Return the host slot caching `guest`, binding one on a miss.
    ///
    /// With `load`, a newly bound slot is filled from guest state;
    /// without it the caller is about to overwrite the value.
    pub fn acquire<B: HostCodeGen>(
        &mut self,
        cx: &mut EmitCx<'_, B>,
        pool: Pool,
        guest: u8,
        load: bool,
    ) -> Result<u8> {
        pool.check(guest)?;

        let slot = match self.pool_mut(pool).bind(guest) {
            Binding::Hit(slot) => return Ok(slot),
            Binding::Fresh(slot) => slot,
            Binding::Evicted { slot, victim } => {
                trace!("evicting {pool} guest {victim} from slot {slot}");
                write_back(cx, pool, slot, victim);
                slot
            }
        };

        if load {
            let mem = cx.state.reg(pool, guest);
            match pool {
                Pool::Int => cx.host.out_ld_int(cx.buf, slot, mem),
                Pool::Vector => cx.host.out_ld_vec(cx.buf, slot, mem),
            }
        }
        trace!("{pool} guest {guest} -> slot {slot} (load={load})");
        Ok(slot)
    }

    /// Write back and free one slot if it holds a guest register.
    pub fn spill_slot<B: HostCodeGen>(
        &mut self,
        cx: &mut EmitCx<'_, B>,
        pool: Pool,
        slot: u8,
    ) {
        let s = *self.pool(pool).slot(slot);
        if !s.used {
            return;
        }
        trace!("spilling {pool} guest {} from slot {slot}", s.guest);
        write_back(cx, pool, slot, s.guest);
        self.pool_mut(pool).release(slot);
    }

    /// Write every bound slot in both pools back to guest state and
    /// free it. Slots caching the hardwired register are freed
    /// without a store.
    pub fn flush<B: HostCodeGen>(&mut self, cx: &mut EmitCx<'_, B>) {
        for pool in [Pool::Vector, Pool::Int] {
            for slot in 0..NUM_SLOTS as u8 {
                let s = *self.pool(pool).slot(slot);
                if s.used && s.guest == HARDWIRED_GUEST {
                    self.pool_mut(pool).release(slot);
                } else {
                    self.spill_slot(cx, pool, slot);
                }
            }
        }
    }
}

fn write_back<B: HostCodeGen>(cx: &mut EmitCx<'_, B>, pool: Pool, slot: u8, guest: u8) {
    let mem = cx.state.reg(pool, guest);
    match pool {
        Pool::Int => cx.host.out_st_int(cx.buf, slot, mem),
        Pool::Vector => cx.host.out_st_vec(cx.buf, slot, mem),
    }
}
