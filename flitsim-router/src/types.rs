// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Packets, flits and credits.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use flitsim_engine::sim_error;
use flitsim_engine::types::SimError;
use flitsim_track::entity::Entity;
use flitsim_track::{Id, create, create_id};

/// Credit count used for buffers that can never fill.
pub const UNBOUNDED_CREDITS: u32 = u32::MAX;

/// Flat index of a `(port, vc)` pair.
///
/// Input queues, output queues, congestion status slots and crossbar
/// scheduler credits are all addressed with this one function.
#[must_use]
pub fn vc_index(port: usize, vc: usize, num_vcs: usize) -> usize {
    port * num_vcs + vc
}

/// A packet: an ordered sequence of flits that share one route.
///
/// The per-flit state lives in the packet so that a [`Flit`] is only ever a
/// handle onto its packet.
#[derive(Debug)]
pub struct Packet {
    /// Unique ID used when tracking the packet.
    pub id: Id,

    tag: u64,
    source: usize,
    destination: usize,
    destination_address: Vec<usize>,

    /// Current VC of each flit.
    vcs: Vec<Cell<usize>>,

    /// Number of routers the head flit has entered.
    hop_count: Cell<u32>,

    created_at: u64,
}

impl Packet {
    /// Create a packet of `num_flits` flits all on `vc`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        created_by: &Rc<Entity>,
        tag: u64,
        source: usize,
        destination: usize,
        destination_address: Vec<usize>,
        num_flits: usize,
        vc: usize,
        created_at: u64,
    ) -> Result<Rc<Self>, SimError> {
        if num_flits == 0 {
            return sim_error!("packet {tag} must contain at least one flit");
        }
        let packet = Rc::new(Self {
            id: create_id!(created_by),
            tag,
            source,
            destination,
            destination_address,
            vcs: (0..num_flits).map(|_| Cell::new(vc)).collect(),
            hop_count: Cell::new(0),
            created_at,
        });
        create!(created_by ; packet, num_flits, 0);
        Ok(packet)
    }

    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Index of the terminal that sent the packet.
    #[must_use]
    pub fn source(&self) -> usize {
        self.source
    }

    /// Index of the terminal the packet is sent to.
    #[must_use]
    pub fn destination(&self) -> usize {
        self.destination
    }

    /// Topology coordinates of the destination terminal.
    #[must_use]
    pub fn destination_address(&self) -> &[usize] {
        &self.destination_address
    }

    #[must_use]
    pub fn num_flits(&self) -> usize {
        self.vcs.len()
    }

    #[must_use]
    pub fn hop_count(&self) -> u32 {
        self.hop_count.get()
    }

    pub fn increment_hop_count(&self) {
        self.hop_count.set(self.hop_count.get() + 1);
    }

    /// Tick at which the packet was created.
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Handle onto flit `index`.
    ///
    /// # Panics
    ///
    /// If `index` is not less than [`Packet::num_flits`].
    #[must_use]
    pub fn flit(self: &Rc<Self>, index: usize) -> Flit {
        assert!(index < self.num_flits());
        Flit {
            packet: self.clone(),
            index,
        }
    }

    /// Handles onto all flits, head first.
    pub fn flits(self: &Rc<Self>) -> impl Iterator<Item = Flit> + '_ {
        (0..self.num_flits()).map(|index| self.flit(index))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet {} ({} -> {})",
            self.tag, self.source, self.destination
        )
    }
}

/// A flow-control digit: a handle onto one flit of a packet.
#[derive(Clone, Debug)]
pub struct Flit {
    packet: Rc<Packet>,
    index: usize,
}

impl Flit {
    #[must_use]
    pub fn packet(&self) -> &Rc<Packet> {
        &self.packet
    }

    /// Position of this flit within its packet.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn is_head(&self) -> bool {
        self.index == 0
    }

    #[must_use]
    pub fn is_tail(&self) -> bool {
        self.index + 1 == self.packet.num_flits()
    }

    /// The VC currently assigned to this flit.
    #[must_use]
    pub fn vc(&self) -> usize {
        self.packet.vcs[self.index].get()
    }

    pub fn set_vc(&self, vc: usize) {
        self.packet.vcs[self.index].set(vc);
    }
}

impl PartialEq for Flit {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.packet, &other.packet) && self.index == other.index
    }
}

impl fmt::Display for Flit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flit {}.{} vc {}",
            self.packet.tag,
            self.index,
            self.vc()
        )
    }
}

/// A credit message listing the VCs that have each freed one buffer slot.
#[derive(Clone, Debug, PartialEq)]
pub struct Credit {
    nums: VecDeque<usize>,
    capacity: usize,
}

impl Credit {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            nums: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add one credit for `vc`.
    pub fn put_num(&mut self, vc: usize) -> Result<(), SimError> {
        if self.is_full() {
            return sim_error!(
                "credit of capacity {} cannot hold vc {vc}",
                self.capacity
            );
        }
        self.nums.push_back(vc);
        Ok(())
    }

    /// True while there are entries left to take with [`Credit::get_num`].
    #[must_use]
    pub fn more(&self) -> bool {
        !self.nums.is_empty()
    }

    /// Take the next entry in the order they were added.
    pub fn get_num(&mut self) -> Option<usize> {
        self.nums.pop_front()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nums.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nums.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nums.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The pending entries without consuming them.
    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.nums.iter()
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "credit {:?}", self.nums)
    }
}

#[cfg(test)]
mod tests {
    use flitsim_track::entity::toplevel;
    use flitsim_track::tracker::dev_null_tracker;

    use super::*;

    #[test]
    fn flit_positions() {
        let top = toplevel(&dev_null_tracker(), "top");
        let packet = Packet::new(&top, 7, 1, 2, vec![2], 3, 1, 0).unwrap();
        let flits: Vec<Flit> = packet.flits().collect();

        assert!(flits[0].is_head() && !flits[0].is_tail());
        assert!(!flits[1].is_head() && !flits[1].is_tail());
        assert!(!flits[2].is_head() && flits[2].is_tail());

        flits[2].set_vc(0);
        assert_eq!(flits[0].vc(), 1);
        assert_eq!(flits[2].vc(), 0);
        assert_eq!(format!("{}", flits[2]), "flit 7.2 vc 0");
    }

    #[test]
    fn single_flit_packet_is_head_and_tail() {
        let top = toplevel(&dev_null_tracker(), "top");
        let packet = Packet::new(&top, 1, 0, 0, vec![0], 1, 0, 0).unwrap();
        let flit = packet.flit(0);
        assert!(flit.is_head() && flit.is_tail());
    }

    #[test]
    fn empty_packet_rejected() {
        let top = toplevel(&dev_null_tracker(), "top");
        assert!(Packet::new(&top, 1, 0, 0, vec![0], 0, 0, 0).is_err());
    }

    #[test]
    fn credit_capacity() {
        let mut credit = Credit::new(2);
        credit.put_num(3).unwrap();
        credit.put_num(0).unwrap();
        assert!(credit.is_full());
        assert!(credit.put_num(1).is_err());

        assert!(credit.more());
        assert_eq!(credit.get_num(), Some(3));
        assert_eq!(credit.get_num(), Some(0));
        assert!(!credit.more());
        assert_eq!(credit.get_num(), None);
    }

    #[test]
    fn vc_index_is_port_major() {
        assert_eq!(vc_index(0, 0, 4), 0);
        assert_eq!(vc_index(2, 1, 4), 9);
        assert_eq!(vc_index(3, 3, 4), 15);
    }
}
