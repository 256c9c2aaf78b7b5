//! Discovery engine: phase machine, slot handlers, and election glue.
//!
//! An [`Engine`] owns one node's protocol state and is driven from outside:
//! the host calls [`Engine::tick`] every [`Engine::current_slot_duration`]
//! and [`Engine::receive_packet`] for every packet heard. Outgoing packets
//! leave through the `send` hook.
//!
//! # Phases
//!
//! Every round runs three phases:
//!
//! 1. **Noisy**: randomized listen/broadcast slots while a crowding window
//!    samples RSSI. The result feeds forwarding, the neighbor-phase broadcast
//!    budget and the node's noise level.
//! 2. **Neighbor**: randomized slots under the crowding-derived budget.
//!    Packets heard while listening populate the neighbor tables.
//! 3. **Discovery**: one 4-slot cycle. Slot 0 carries the node's own message,
//!    slots 1-3 relay queued packets. Completing the cycle runs maintenance and
//!    role evaluation, then the next round starts.
//!
//! # Async driver
//!
//! [`Engine::run`] ties the engine to a [`Transport`] and [`Clock`]: it waits
//! for either an incoming frame or the next slot deadline.

use alloc::boxed::Box;
use core::fmt;

use embassy_futures::select::{select, Either};

use crate::config::{ConfigError, EngineConfig};
use crate::cycle::{DiscoveryCycle, SlotType, NUM_SLOTS};
#[cfg(feature = "debug")]
use crate::debug::DebugChannel;
use crate::debug::DropReason;
use crate::election::{ConnectivityMetrics, ElectionState};
use crate::forwarding::{noise_level_from_crowding, should_forward, Xorshift32};
use crate::node::{MeshNode, Neighbor, NodeStats};
use crate::packet::{DiscoveryPacket, ElectionData, ElectionPacket, Packet};
use crate::queue::ForwardingQueue;
use crate::time::{Duration, Timestamp};
use crate::timing::BroadcastTiming;
use crate::traits::{Clock, Random, Transport};
use crate::types::{Error, GpsLocation, LogLevel, NodeId, NodeState, MAX_ELECTION_ROUNDS};
use crate::wire::{Decode, DecodeError};

/// Mixed into the timing seed for the neighbor-phase generator so the two
/// phases do not replay the same draws.
const NEIGHBOR_SEED_MIX: u32 = 0x9e37_79b9;

/// Multiplier spreading node ids over the seed space.
const NODE_SEED_MIX: u32 = 0x85eb_ca6b;

/// Per-node seed: nodes sharing a configured seed still draw independently.
fn node_seed(seed: u32, node_id: NodeId) -> u32 {
    seed ^ node_id.wrapping_mul(NODE_SEED_MIX)
}

/// Engine phase within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Noisy,
    Neighbor,
    Discovery,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Noisy => "NOISY",
            Phase::Neighbor => "NEIGHBOR",
            Phase::Discovery => "DISCOVERY",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What happened to a received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    /// Noisy phase: only the RSSI was recorded.
    Sampled,
    /// Neighbor phase: tables updated, nothing queued.
    Observed,
    /// Discovery phase: queued for relaying.
    Queued,
    /// Discovery phase: tables updated but the queue refused it.
    Rejected(Error),
    /// Disabled, or heard during an own broadcast slot.
    Ignored,
}

pub type SendHook = Box<dyn FnMut(&Packet)>;
pub type LogHook = Box<dyn FnMut(LogLevel, &str)>;
pub type MetricsHook = Box<dyn FnMut(&ConnectivityMetrics)>;

/// Host callbacks. `send` is required, the others are optional.
#[derive(Default)]
pub struct EngineHooks {
    pub send: Option<SendHook>,
    pub log: Option<LogHook>,
    /// Called once per completed discovery cycle.
    pub metrics: Option<MetricsHook>,
}

impl EngineHooks {
    pub fn new(send: impl FnMut(&Packet) + 'static) -> Self {
        Self {
            send: Some(Box::new(send)),
            log: None,
            metrics: None,
        }
    }

    pub fn with_log(mut self, log: impl FnMut(LogLevel, &str) + 'static) -> Self {
        self.log = Some(Box::new(log));
        self
    }

    pub fn with_metrics(mut self, metrics: impl FnMut(&ConnectivityMetrics) + 'static) -> Self {
        self.metrics = Some(Box::new(metrics));
        self
    }
}

/// Point-in-time summary of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub state: NodeState,
    pub phase: Phase,
    pub cycle: u32,
    pub stats: NodeStats,
    pub neighbor_count: usize,
    pub direct_neighbors: usize,
    pub clusterhead_id: NodeId,
    pub pdsf: u32,
    pub candidacy_score: f64,
    pub crowding_factor: f64,
    pub queue_len: usize,
}

fn emit_log(hooks: &mut EngineHooks, level: LogLevel, args: fmt::Arguments<'_>) {
    if let Some(log) = hooks.log.as_mut() {
        let message = alloc::fmt::format(args);
        log(level, &message);
    }
}

/// Hop count as carried in the selection rule: path length, at least 1.
fn hops_of(base: &DiscoveryPacket) -> u8 {
    base.hop_count().clamp(1, u8::MAX as usize) as u8
}

/// Everything the cycle's slot handlers operate on.
struct Core {
    config: EngineConfig,
    hooks: EngineHooks,

    node: MeshNode,
    queue: ForwardingQueue,
    election: ElectionState,

    noisy: BroadcastTiming,
    neighbor_timing: BroadcastTiming,
    forward_rng: Xorshift32,

    phase: Phase,
    /// Slots used so far in the Noisy or Neighbor phase.
    phase_slot: u32,
    /// Forwarding crowding input, from the last Noisy phase or the host.
    crowding_factor: f64,
    enabled: bool,
    now: Timestamp,
    cycle_duration: Duration,

    election_rounds_remaining: u8,
    renouncement_rounds_remaining: u8,
    last_election_cycle: u32,
    /// Direct-connection count announced in own election packets.
    announced_direct: u32,
    selected_hops: u8,
    selected_direct: u32,

    #[cfg(feature = "debug")]
    debug: DebugChannel,
}

impl Core {
    fn new(config: EngineConfig, hooks: EngineHooks, cycle_duration: Duration) -> Self {
        let mut core = Self {
            node: MeshNode::new(config.node_id),
            queue: ForwardingQueue::new(),
            election: ElectionState::new(),
            noisy: BroadcastTiming::noisy(config.noise_slot_duration_ms),
            neighbor_timing: BroadcastTiming::stochastic(config.neighbor_slot_duration_ms),
            forward_rng: Xorshift32::new(node_seed(config.forwarding_seed, config.node_id)),
            phase: Phase::Noisy,
            phase_slot: 0,
            crowding_factor: 0.0,
            enabled: true,
            now: Timestamp::ZERO,
            cycle_duration,
            election_rounds_remaining: 0,
            renouncement_rounds_remaining: 0,
            last_election_cycle: 0,
            announced_direct: 0,
            selected_hops: 0,
            selected_direct: 0,
            #[cfg(feature = "debug")]
            debug: DebugChannel::new(),
            config,
            hooks,
        };
        core.seed_timing();
        core.election.begin_crowding_measurement();
        core
    }

    #[cfg(feature = "debug")]
    fn debug_channel(&self) -> &DebugChannel {
        &self.debug
    }

    fn seed_timing(&mut self) {
        let seed = node_seed(self.config.timing_seed, self.config.node_id);
        self.noisy.set_seed(seed);
        self.neighbor_timing.set_seed(seed ^ NEIGHBOR_SEED_MIX);
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.node.reset();
        self.election.reset();
        self.noisy = BroadcastTiming::noisy(self.config.noise_slot_duration_ms);
        self.neighbor_timing = BroadcastTiming::stochastic(self.config.neighbor_slot_duration_ms);
        self.seed_timing();
        self.forward_rng = Xorshift32::new(node_seed(
            self.config.forwarding_seed,
            self.config.node_id,
        ));
        self.crowding_factor = 0.0;
        self.election_rounds_remaining = 0;
        self.renouncement_rounds_remaining = 0;
        self.last_election_cycle = 0;
        self.announced_direct = 0;
        self.selected_hops = 0;
        self.selected_direct = 0;
        self.phase = Phase::Noisy;
        self.phase_slot = 0;
        self.election.begin_crowding_measurement();
    }

    fn send(&mut self, packet: &Packet) {
        if let Some(send) = self.hooks.send.as_mut() {
            send(packet);
        }
    }

    fn current_gps(&self) -> Option<GpsLocation> {
        if self.node.is_gps_cache_valid() {
            self.node.gps().copied()
        } else {
            None
        }
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        self.phase = to;
        self.phase_slot = 0;
        if to == Phase::Noisy {
            self.election.begin_crowding_measurement();
        }
        emit_debug!(
            self,
            crate::debug::DebugEvent::PhaseChanged {
                timestamp: self.now,
                from,
                to,
            }
        );
        emit_log(
            &mut self.hooks,
            LogLevel::Debug,
            format_args!("phase {} -> {}", from, to),
        );
    }

    /// Apply a role change. Logs and returns false when it is not allowed.
    fn transition(&mut self, next: NodeState) -> bool {
        let from = self.node.state();
        match self.node.set_state(next) {
            Ok(()) => {
                if from != next {
                    emit_debug!(
                        self,
                        crate::debug::DebugEvent::StateChanged {
                            cycle: self.node.current_cycle(),
                            from,
                            to: next,
                        }
                    );
                    emit_log(
                        &mut self.hooks,
                        LogLevel::Info,
                        format_args!("node {}: {} -> {}", self.node.node_id(), from, next),
                    );
                }
                true
            }
            Err(e) => {
                emit_log(&mut self.hooks, LogLevel::Debug, format_args!("{}", e));
                false
            }
        }
    }

    // --- Noisy and Neighbor phases ---

    fn noisy_tick(&mut self) {
        if self.noisy.advance_slot() {
            self.broadcast_beacon();
        }
        self.phase_slot += 1;
        if self.phase_slot >= self.config.noise_slot_count {
            self.finish_noise_measurement();
            self.set_phase(Phase::Neighbor);
        }
    }

    fn finish_noise_measurement(&mut self) {
        let crowding = self.election.end_crowding_measurement();
        self.crowding_factor = crowding;
        self.neighbor_timing.set_crowding(crowding);
        self.node.set_noise_level(noise_level_from_crowding(crowding));
    }

    /// Run one neighbor-phase slot. Returns true once the phase is used up.
    fn neighbor_tick(&mut self) -> bool {
        if self.neighbor_timing.advance_slot() {
            self.broadcast_beacon();
        }
        self.phase_slot += 1;
        self.phase_slot >= self.config.neighbor_slot_count
    }

    fn broadcast_beacon(&mut self) {
        let packet = Packet::Discovery(self.own_beacon());
        self.send(&packet);
        self.node.inc_sent();
    }

    // --- Discovery cycle slots ---

    fn run_slot(core: &mut Core, slot: u8) {
        match SlotType::of(slot) {
            SlotType::OwnMessage => core.transmit_own_message(),
            SlotType::Forwarding => core.forward_next(),
        }
    }

    fn on_cycle_complete(core: &mut Core, _cycle_count: u32) {
        core.complete_cycle();
    }

    fn own_beacon(&self) -> DiscoveryPacket {
        let id = self.node.node_id();
        let mut packet = DiscoveryPacket::new(id);
        packet.ttl = self.config.initial_ttl;
        // An empty path always has room for the originator.
        let _ = packet.add_to_path(id);
        if let Some(gps) = self.current_gps() {
            packet.set_gps(gps);
        }
        packet.is_clusterhead_message = self.node.state() == NodeState::Clusterhead;
        packet
    }

    fn own_election(&mut self) -> Packet {
        let mut base = self.own_beacon();
        base.is_clusterhead_message = true;
        let data = ElectionData {
            class_id: self.node.cluster_class(),
            direct_connections: self.announced_direct,
            score: self.node.candidacy_score(),
            hash: self.node.election_hash(),
            ..ElectionData::default()
        };
        let mut packet = ElectionPacket::new(base, data);
        let pdsf = packet.update_pdsf(self.announced_direct, 0);
        self.node.set_pdsf(pdsf);
        Packet::Election(packet)
    }

    /// Slot 0: renouncement, else election announcement, else beacon.
    fn transmit_own_message(&mut self) {
        let cycle = self.node.current_cycle();
        let packet = if self.renouncement_rounds_remaining > 0 {
            self.renouncement_rounds_remaining -= 1;
            emit_debug!(
                self,
                crate::debug::DebugEvent::RenouncementSent {
                    cycle,
                    rounds_left: self.renouncement_rounds_remaining,
                }
            );
            Packet::Election(ElectionPacket::renouncement(self.own_beacon()))
        } else if self.node.state() == NodeState::CandidateClusterhead
            && self.election_rounds_remaining > 0
        {
            self.election_rounds_remaining -= 1;
            self.last_election_cycle = cycle;
            let packet = self.own_election();
            emit_debug!(
                self,
                crate::debug::DebugEvent::ElectionSent {
                    cycle,
                    direct_connections: self.announced_direct,
                    pdsf: self.node.pdsf(),
                    rounds_left: self.election_rounds_remaining,
                }
            );
            packet
        } else {
            Packet::Discovery(self.own_beacon())
        };
        self.send(&packet);
        self.node.inc_sent();
    }

    /// Slots 1-3: relay the most urgent queued packet, or drop it.
    fn forward_next(&mut self) {
        let direct = self.node.count_direct_neighbors();
        let gps = self.current_gps();
        let Some(head) = self.queue.peek() else {
            return;
        };
        let forward = should_forward(
            head.packet.base(),
            gps.as_ref(),
            self.crowding_factor,
            self.config.proximity_threshold,
            direct,
            &mut self.forward_rng,
        );

        let Some(entry) = self.queue.dequeue() else {
            return;
        };
        let mut packet = entry.packet;
        let sender = packet.sender_id();

        if !forward {
            self.drop_packet(sender, DropReason::Policy);
            return;
        }
        if !packet.decrement_ttl() {
            self.drop_packet(sender, DropReason::TtlExhausted);
            return;
        }

        if let Packet::Election(election) = &mut packet {
            if !election.election.is_renouncement {
                let already_reached = election
                    .base
                    .path
                    .iter()
                    .filter(|id| self.node.find_neighbor(**id).is_some_and(Neighbor::is_direct))
                    .count() as u32;
                election.update_pdsf(direct as u32, already_reached);
                if election.pdsf_saturated() {
                    self.drop_packet(sender, DropReason::PdsfSaturated);
                    return;
                }
            }
        }

        if packet.add_to_path(self.node.node_id()).is_err() {
            self.drop_packet(sender, DropReason::PathFull);
            return;
        }
        if let Some(gps) = gps {
            packet.base_mut().set_gps(gps);
        }

        self.send(&packet);
        self.node.inc_forwarded();
        self.election.record_forwarded();
        emit_debug!(
            self,
            crate::debug::DebugEvent::PacketForwarded {
                sender,
                ttl: packet.ttl(),
                msg_type: packet.message_type(),
            }
        );
    }

    fn drop_packet(&mut self, sender: NodeId, reason: DropReason) {
        self.node.inc_dropped();
        emit_debug!(
            self,
            crate::debug::DebugEvent::PacketDropped { sender, reason }
        );
        emit_log(
            &mut self.hooks,
            LogLevel::Debug,
            format_args!("dropped packet from {}: {:?}", sender, reason),
        );
    }

    // --- Cycle completion ---

    fn complete_cycle(&mut self) {
        self.node.advance_cycle();

        let timeout = self.config.neighbor_timeout_cycles;
        let pruned = self.node.prune_stale_neighbors(timeout);
        let max_age = self.cycle_duration * timeout as u64;
        let expired = self.queue.clean_old_entries(self.now, max_age);
        self.election.clean_old_neighbors(self.now, max_age);

        self.node.update_statistics();
        let metrics = *self.election.update_metrics();
        if let Some(hook) = self.hooks.metrics.as_mut() {
            hook(&metrics);
        }

        self.evaluate_role();

        emit_debug!(
            self,
            crate::debug::DebugEvent::CycleCompleted {
                cycle: self.node.current_cycle(),
                state: self.node.state(),
                neighbors: self.node.neighbor_count(),
                direct: self.node.count_direct_neighbors(),
                crowding: self.crowding_factor,
            }
        );
        emit_log(
            &mut self.hooks,
            LogLevel::Debug,
            format_args!(
                "cycle {} complete: pruned {} neighbors, expired {} seen",
                self.node.current_cycle(),
                pruned,
                expired
            ),
        );

        self.set_phase(Phase::Noisy);
    }

    /// Role decision at cycle end.
    ///
    /// A candidate is promoted one full cycle after the cycle that carried its
    /// last election round, so late conflicting announcements still get heard.
    fn evaluate_role(&mut self) {
        let state = self.node.state();
        match state {
            NodeState::Init => {
                self.transition(NodeState::Discovery);
            }
            NodeState::CandidateClusterhead => {
                if self.election_rounds_remaining == 0
                    && self.node.current_cycle() > self.last_election_cycle.saturating_add(1)
                    && self.transition(NodeState::Clusterhead)
                {
                    let own = self.node.node_id();
                    let class = self.node.cluster_class();
                    self.node.set_clusterhead(own, class);
                }
            }
            NodeState::Clusterhead => {}
            NodeState::Discovery | NodeState::Edge | NodeState::Member => {
                if !self.node.has_clusterhead() && self.node.should_become_candidate() {
                    self.become_candidate();
                    return;
                }
                match state {
                    NodeState::Discovery if self.node.should_become_edge() => {
                        self.transition(NodeState::Edge);
                    }
                    NodeState::Edge if self.node.has_clusterhead() => {
                        self.transition(NodeState::Member);
                    }
                    _ => {}
                }
            }
        }
    }

    fn become_candidate(&mut self) {
        if !self.transition(NodeState::CandidateClusterhead) {
            return;
        }
        self.election_rounds_remaining = MAX_ELECTION_ROUNDS;
        self.renouncement_rounds_remaining = 0;
        self.announced_direct = self.node.count_direct_neighbors() as u32;
        let score = self.node.calculate_candidacy_score(self.node.noise_level());
        self.node.set_candidacy_score(score);
    }

    // --- Reception ---

    fn receive(&mut self, packet: &Packet, rssi: i8) -> Reception {
        match self.phase {
            Phase::Noisy => {
                if !self.noisy.should_listen() {
                    return Reception::Ignored;
                }
                self.election.add_rssi_sample(rssi);
                Reception::Sampled
            }
            Phase::Neighbor => {
                if !self.neighbor_timing.should_listen() {
                    return Reception::Ignored;
                }
                self.observe(packet, rssi);
                Reception::Observed
            }
            Phase::Discovery => {
                self.observe(packet, rssi);
                self.enqueue(packet)
            }
        }
    }

    /// Update neighbor tables and election state from a heard packet.
    fn observe(&mut self, packet: &Packet, rssi: i8) {
        let own = self.node.node_id();
        let base = packet.base();
        let transmitter = base.last_hop();
        if transmitter == own {
            return;
        }

        if self.node.add_neighbor(transmitter, rssi, 1).is_err() {
            emit_log(
                &mut self.hooks,
                LogLevel::Warn,
                format_args!("neighbor table full, ignoring {}", transmitter),
            );
        }
        if let Some(gps) = base.gps {
            self.node.update_neighbor_gps(transmitter, gps);
        }

        let origin = base.sender_id;
        if origin != transmitter && origin != own {
            let known_direct = self
                .node
                .find_neighbor(origin)
                .is_some_and(Neighbor::is_direct);
            if !known_direct {
                // Table-full is already reported for the transmitter.
                let _ = self.node.add_neighbor(origin, rssi, hops_of(base));
            }
        }

        self.election
            .update_neighbor(transmitter, base.gps, rssi, self.now);
        self.handle_election(packet);
    }

    fn enqueue(&mut self, packet: &Packet) -> Reception {
        match self.queue.enqueue(packet, self.node.node_id(), self.now) {
            Ok(()) => {
                self.node.inc_received();
                self.election.record_received();
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::PacketEnqueued {
                        sender: packet.sender_id(),
                        ttl: packet.ttl(),
                        msg_type: packet.message_type(),
                    }
                );
                Reception::Queued
            }
            Err(e) => {
                emit_debug!(
                    self,
                    crate::debug::DebugEvent::PacketRejected {
                        sender: packet.sender_id(),
                        reason: match e {
                            Error::LoopDetected => crate::debug::RejectReason::Loop,
                            Error::Duplicate => crate::debug::RejectReason::Duplicate,
                            _ => crate::debug::RejectReason::Overflow,
                        },
                    }
                );
                emit_log(
                    &mut self.hooks,
                    LogLevel::Debug,
                    format_args!("queue rejected packet from {}: {}", packet.sender_id(), e),
                );
                Reception::Rejected(e)
            }
        }
    }

    fn handle_election(&mut self, packet: &Packet) {
        let sender = packet.sender_id();
        if sender == self.node.node_id() {
            return;
        }
        let hops = hops_of(packet.base());
        match packet {
            Packet::Discovery(beacon) => {
                if beacon.is_clusterhead_message {
                    self.node.mark_neighbor_clusterhead(sender, 0);
                    self.consider_clusterhead(sender, hops, 0, 0);
                }
            }
            Packet::Election(election) if election.election.is_renouncement => {
                self.handle_renouncement(sender);
            }
            Packet::Election(election) => {
                self.node.mark_candidate_heard();
                match self.node.state() {
                    NodeState::CandidateClusterhead => {
                        self.resolve_conflict(sender, hops, &election.election)
                    }
                    NodeState::Clusterhead => {}
                    _ => self.consider_clusterhead(
                        sender,
                        hops,
                        election.election.direct_connections,
                        election.election.class_id,
                    ),
                }
            }
        }
    }

    /// Candidate heard another candidate. The better one keeps running.
    fn resolve_conflict(&mut self, sender: NodeId, hops: u8, remote: &ElectionData) {
        let own_direct = self.announced_direct;
        let remote_direct = remote.direct_connections;
        let remote_wins = remote_direct > own_direct
            || (remote_direct == own_direct && sender < self.node.node_id());
        if !remote_wins || !self.transition(NodeState::Edge) {
            return;
        }

        self.election_rounds_remaining = 0;
        self.renouncement_rounds_remaining = MAX_ELECTION_ROUNDS;
        self.node.set_clusterhead(sender, remote.class_id);
        self.selected_hops = hops;
        self.selected_direct = remote_direct;

        emit_debug!(
            self,
            crate::debug::DebugEvent::ElectionLost {
                winner: sender,
                own_direct,
                winner_direct: remote_direct,
            }
        );
        emit_log(
            &mut self.hooks,
            LogLevel::Info,
            format_args!(
                "node {} lost election to {} ({} vs {} direct)",
                self.node.node_id(),
                sender,
                own_direct,
                remote_direct
            ),
        );
    }

    /// Selection rule: none yet, fewer hops, more direct connections, lower id.
    fn consider_clusterhead(&mut self, sender: NodeId, hops: u8, direct: u32, class: u16) {
        if matches!(
            self.node.state(),
            NodeState::CandidateClusterhead | NodeState::Clusterhead
        ) {
            return;
        }

        let current = self.node.clusterhead_id();
        if current == sender {
            self.selected_hops = self.selected_hops.min(hops);
            self.selected_direct = self.selected_direct.max(direct);
            return;
        }

        let accept = !self.node.has_clusterhead()
            || hops < self.selected_hops
            || (hops == self.selected_hops && direct > self.selected_direct)
            || (hops == self.selected_hops && direct == self.selected_direct && sender < current);
        if !accept {
            return;
        }

        self.node.set_clusterhead(sender, class);
        self.selected_hops = hops;
        self.selected_direct = direct;
        emit_debug!(
            self,
            crate::debug::DebugEvent::ClusterheadSelected {
                clusterhead: sender,
                hops,
                direct_connections: direct,
            }
        );
        emit_log(
            &mut self.hooks,
            LogLevel::Info,
            format_args!(
                "node {} selected clusterhead {} ({} hops)",
                self.node.node_id(),
                sender,
                hops
            ),
        );
    }

    fn handle_renouncement(&mut self, sender: NodeId) {
        if self.node.clusterhead_id() != sender {
            return;
        }
        self.node.clear_clusterhead();
        self.selected_hops = 0;
        self.selected_direct = 0;
        emit_log(
            &mut self.hooks,
            LogLevel::Info,
            format_args!("clusterhead {} renounced", sender),
        );

        let state = self.node.state();
        if state == NodeState::CandidateClusterhead {
            return;
        }
        if !self.transition(NodeState::Discovery) && state == NodeState::Member {
            self.transition(NodeState::Edge);
        }
    }
}

/// One node's discovery and election engine.
pub struct Engine {
    core: Core,
    cycle: DiscoveryCycle<Core>,
}

impl Engine {
    /// Validate the configuration and build an engine in the Noisy phase.
    pub fn new(config: EngineConfig, hooks: EngineHooks) -> Result<Self, ConfigError> {
        config.validate()?;
        if hooks.send.is_none() {
            return Err(ConfigError::MissingSendHook);
        }

        let mut cycle = DiscoveryCycle::new();
        cycle.set_slot_duration(Duration::from_millis(config.slot_duration_ms as u64));
        for slot in 0..NUM_SLOTS as u8 {
            cycle.set_slot_handler(slot, Core::run_slot);
        }
        cycle.set_complete_handler(Core::on_cycle_complete);

        let core = Core::new(config, hooks, cycle.cycle_duration());
        Ok(Self { core, cycle })
    }

    /// Run one slot of the current phase. No-op while disabled.
    pub fn tick(&mut self, now: Timestamp) {
        if !self.core.enabled {
            return;
        }
        self.core.now = now;

        match self.core.phase {
            Phase::Noisy => self.core.noisy_tick(),
            Phase::Neighbor => {
                if self.core.neighbor_tick() {
                    self.core.set_phase(Phase::Discovery);
                    self.cycle.start();
                }
            }
            Phase::Discovery => {
                if !self.cycle.is_running() {
                    self.cycle.start();
                }
                self.cycle.execute_slot(&mut self.core);
                self.cycle.advance_slot(&mut self.core);
                if self.core.phase != Phase::Discovery {
                    self.cycle.stop();
                }
            }
        }
    }

    /// Handle a packet heard at `rssi`. What happens depends on the phase.
    pub fn receive_packet(&mut self, packet: &Packet, rssi: i8, now: Timestamp) -> Reception {
        if !self.core.enabled {
            return Reception::Ignored;
        }
        self.core.now = now;
        self.core.receive(packet, rssi)
    }

    /// Decode a raw frame and hand it to [`Engine::receive_packet`].
    pub fn receive_frame(
        &mut self,
        data: &[u8],
        rssi: i8,
        now: Timestamp,
    ) -> Result<Reception, DecodeError> {
        let packet = Packet::decode_from_slice(data)?;
        Ok(self.receive_packet(&packet, rssi, now))
    }

    /// How long until the next tick, given the current phase.
    pub fn current_slot_duration(&self) -> Duration {
        let ms = match self.core.phase {
            Phase::Noisy => self.core.config.noise_slot_duration_ms,
            Phase::Neighbor => self.core.config.neighbor_slot_duration_ms,
            Phase::Discovery => self.core.config.slot_duration_ms,
        };
        Duration::from_millis(ms as u64)
    }

    /// Drive the engine from a transport and clock forever.
    pub async fn run<T: Transport, C: Clock>(&mut self, transport: &T, clock: &C) -> ! {
        let mut deadline = clock.now();
        loop {
            deadline = self.run_once(transport, clock, deadline).await;
        }
    }

    /// Wait for a frame or `deadline`, handle whichever comes first, and
    /// return the next deadline.
    pub async fn run_once<T: Transport, C: Clock>(
        &mut self,
        transport: &T,
        clock: &C,
        deadline: Timestamp,
    ) -> Timestamp {
        match select(transport.incoming().receive(), clock.sleep_until(deadline)).await {
            Either::First(frame) => {
                let now = clock.now();
                if let Err(e) = self.receive_frame(&frame.data, frame.rssi, now) {
                    emit_log(
                        &mut self.core.hooks,
                        LogLevel::Warn,
                        format_args!("dropping undecodable frame ({} bytes): {}", frame.data.len(), e),
                    );
                }
                deadline
            }
            Either::Second(()) => {
                self.tick(clock.now());
                deadline + self.current_slot_duration()
            }
        }
    }

    // --- Host controls ---

    /// Override the forwarding crowding input, clamped to `[0, 1]`.
    pub fn set_crowding_factor(&mut self, crowding: f64) {
        self.core.crowding_factor = crowding.clamp(0.0, 1.0);
    }

    pub fn set_noise_level(&mut self, noise_level: f64) {
        self.core.node.set_noise_level(noise_level);
    }

    pub fn set_gps(&mut self, x: f64, y: f64, z: f64, valid: bool) {
        if valid {
            self.core.node.set_gps(GpsLocation::new(x, y, z));
        } else {
            self.core.node.clear_gps();
        }
    }

    pub fn mark_candidate_heard(&mut self) {
        self.core.node.mark_candidate_heard();
    }

    /// Reseed the forwarding generator.
    pub fn seed_random(&mut self, seed: u32) {
        self.core.forward_rng.reseed(seed);
    }

    /// Back to a fresh node in the Noisy phase. Config and hooks are kept.
    pub fn reset(&mut self) {
        self.cycle.stop();
        self.cycle.reset_cycle_count();
        self.core.reset();
    }

    pub fn enable(&mut self) {
        self.core.enabled = true;
    }

    /// Stop reacting to ticks and packets until [`Engine::enable`].
    pub fn disable(&mut self) {
        self.core.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    // --- Accessors ---

    pub fn node(&self) -> &MeshNode {
        &self.core.node
    }

    pub fn node_id(&self) -> NodeId {
        self.core.node.node_id()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn phase(&self) -> Phase {
        self.core.phase
    }

    pub fn queue(&self) -> &ForwardingQueue {
        &self.core.queue
    }

    pub fn election(&self) -> &ElectionState {
        &self.core.election
    }

    pub fn crowding_factor(&self) -> f64 {
        self.core.crowding_factor
    }

    /// Completed discovery cycles since start or reset.
    pub fn cycle_count(&self) -> u32 {
        self.cycle.cycle_count()
    }

    /// Current discovery-cycle slot. Only meaningful in the Discovery phase.
    pub fn cycle_slot(&self) -> u8 {
        self.cycle.current_slot()
    }

    pub fn election_rounds_remaining(&self) -> u8 {
        self.core.election_rounds_remaining
    }

    pub fn renouncement_rounds_remaining(&self) -> u8 {
        self.core.renouncement_rounds_remaining
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        let node = &self.core.node;
        NodeSnapshot {
            node_id: node.node_id(),
            state: node.state(),
            phase: self.core.phase,
            cycle: node.current_cycle(),
            stats: *node.stats(),
            neighbor_count: node.neighbor_count(),
            direct_neighbors: node.count_direct_neighbors(),
            clusterhead_id: node.clusterhead_id(),
            pdsf: node.pdsf(),
            candidacy_score: node.candidacy_score(),
            crowding_factor: self.core.crowding_factor,
            queue_len: self.core.queue.len(),
        }
    }

    /// Debug event channel. Drain with `try_receive()`.
    #[cfg(feature = "debug")]
    pub fn debug_channel(&self) -> &DebugChannel {
        self.core.debug_channel()
    }
}
