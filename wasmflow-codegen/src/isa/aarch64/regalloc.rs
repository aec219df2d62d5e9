//! Backtracking register allocator (§4.4): linearize blocks, build a
//! live-range bundle per vreg, then place bundles into physical registers
//! by priority (highest spill weight first), evicting lower-weight
//! occupants or spilling to a stack slot on conflict.
//!
//! Physical-register constraints (ABI parameter/return/call-clobber
//! registers already wired as bare `Reg::P` operands by the lowerer) are
//! folded into the same occupancy structure used for vreg bundles, as
//! fixed, un-evictable ranges — this is what gives call sites and entry/
//! return marshalling their "pre-colored bundle" behavior without a
//! separate code path.

use crate::isa::aarch64::regs::{self, PReg, RegClass};
use crate::isa::aarch64::vcode::{Reg, VCodeFunction, VCodeInst, VReg};
use crate::result::{CompileError, CompileResult};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

/// Float scratch pair for spill reload/store, carved out of the callee-saved
/// float set since (unlike the integer side's X16/X17) no register is
/// reserved for this role in the ABI table.
const FLOAT_SCRATCH0: PReg = PReg::float(14);
const FLOAT_SCRATCH1: PReg = PReg::float(15);

/// Test-facing summary of what the allocator had to do (§8.1 scenario 6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegallocReport {
    pub spill_slots: u32,
    pub evictions: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Range {
    start: u32,
    end: u32,
}

impl Range {
    fn overlaps(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }
}

fn merge_adjacent(ranges: &mut Vec<Range>) {
    let mut out: Vec<Range> = Vec::with_capacity(ranges.len());
    for r in ranges.drain(..) {
        if let Some(last) = out.last_mut() {
            if r.start <= last.end {
                last.end = last.end.max(r.end);
                continue;
            }
        }
        out.push(r);
    }
    *ranges = out;
}

fn ranges_overlap(a: &[Range], b: &[Range]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i].overlaps(&b[j]) {
            return true;
        }
        if a[i].end <= b[j].start {
            i += 1;
        } else {
            j += 1;
        }
    }
    false
}

struct Bundle {
    vreg: VReg,
    ranges: Vec<Range>,
    weight: u64,
    assigned: Option<PReg>,
    spill_slot: Option<u32>,
}

#[derive(Clone, Copy)]
enum OccupantOwner {
    Fixed,
    Bundle(u32),
}

struct Occupant {
    range: Range,
    weight: u64,
    owner: OccupantOwner,
}

/// One preg's sorted occupancy list, queried via an ordered two-pointer
/// scan against a candidate bundle's own sorted ranges (§4.4 step 6).
#[derive(Default)]
struct PregTrack {
    occupants: Vec<Occupant>,
}

impl PregTrack {
    fn conflict_indices(&self, ranges: &[Range]) -> Vec<usize> {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.occupants.len() && j < ranges.len() {
            if self.occupants[i].range.overlaps(&ranges[j]) {
                if out.last() != Some(&i) {
                    out.push(i);
                }
                if self.occupants[i].range.end < ranges[j].end {
                    i += 1;
                } else {
                    j += 1;
                }
            } else if self.occupants[i].range.end <= ranges[j].start {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    fn insert(&mut self, ranges: &[Range], weight: u64, owner: OccupantOwner) {
        for r in ranges {
            self.occupants.push(Occupant { range: *r, weight, owner });
        }
        self.occupants.sort_by_key(|o| o.range.start);
    }

    fn remove_bundle(&mut self, bundle_idx: u32) {
        self.occupants
            .retain(|o| !matches!(o.owner, OccupantOwner::Bundle(b) if b == bundle_idx));
    }
}

struct Allocator {
    block_start: Vec<u32>,
    block_end: Vec<u32>,
    loop_depth: Vec<u32>,
    bundles: Vec<Bundle>,
    vreg_to_bundle: HashMap<u32, u32>,
    int_tracks: HashMap<u8, PregTrack>,
    float_tracks: HashMap<u8, PregTrack>,
    coalesced: HashSet<(usize, usize)>,
    next_spill_slot: u32,
    evictions: u32,
}

pub fn allocate(mut vcode: VCodeFunction) -> CompileResult<VCodeFunction> {
    let mut a = Allocator {
        block_start: Vec::new(),
        block_end: Vec::new(),
        loop_depth: Vec::new(),
        bundles: Vec::new(),
        vreg_to_bundle: HashMap::new(),
        int_tracks: HashMap::new(),
        float_tracks: HashMap::new(),
        coalesced: HashSet::new(),
        next_spill_slot: 0,
        evictions: 0,
    };
    a.number_program_points(&vcode);
    a.compute_loop_depths(&vcode);
    let (live_in, live_out) = a.compute_liveness(&vcode);
    a.build_bundles(&vcode, &live_in, &live_out);
    a.coalesce(&vcode);
    a.seed_fixed_occupancy(&vcode);
    a.place_bundles()?;
    a.rewrite(&mut vcode)?;

    vcode.spill_slot_count = a.next_spill_slot;
    vcode.callee_saved_used = a.callee_saved_used();
    let report = RegallocReport { spill_slots: a.next_spill_slot, evictions: a.evictions };
    debug!(
        "regalloc: func={} spill_slots={} evictions={}",
        vcode.name, report.spill_slots, report.evictions
    );
    Ok(vcode)
}

impl Allocator {
    /// Each instruction gets two linear points, `use_point` then
    /// `def_point` right after it, so a `Copy`'s source (used at its
    /// use-point) and destination (defined at its def-point) end up
    /// adjacent rather than coincident — without the split, every copy's
    /// src/dst ranges would appear to overlap at the shared point and
    /// coalescing could never fire.
    fn number_program_points(&mut self, vcode: &VCodeFunction) {
        let mut pos = 0u32;
        for block in &vcode.blocks {
            self.block_start.push(pos);
            pos += 2 * (block.insts.len() as u32 + 1);
            self.block_end.push(pos);
        }
    }

    /// Marks every block inside a back edge's span (target index <= source
    /// index, valid since blocks are numbered in reverse postorder) as one
    /// loop level deeper. Approximate but cheap, and only feeds spill-weight
    /// scaling, not correctness.
    fn compute_loop_depths(&mut self, vcode: &VCodeFunction) {
        self.loop_depth = vec![0; vcode.blocks.len()];
        for (i, block) in vcode.blocks.iter().enumerate() {
            let Some(term) = &block.terminator else { continue };
            for succ in term.successors() {
                if succ <= i {
                    for depth in self.loop_depth[succ..=i].iter_mut() {
                        *depth += 1;
                    }
                }
            }
        }
    }

    fn compute_liveness(&self, vcode: &VCodeFunction) -> (Vec<HashSet<VReg>>, Vec<HashSet<VReg>>) {
        let n = vcode.blocks.len();
        let mut use_b: Vec<HashSet<VReg>> = vec![HashSet::new(); n];
        let mut def_b: Vec<HashSet<VReg>> = vec![HashSet::new(); n];
        for (i, block) in vcode.blocks.iter().enumerate() {
            let mut defined_local: HashSet<VReg> = HashSet::new();
            for inst in &block.insts {
                for r in inst.uses() {
                    if let Some(v) = r.as_vreg() {
                        if !defined_local.contains(&v) {
                            use_b[i].insert(v);
                        }
                    }
                }
                for r in inst.defs() {
                    if let Some(v) = r.as_vreg() {
                        defined_local.insert(v);
                        def_b[i].insert(v);
                    }
                }
            }
            if let Some(term) = &block.terminator {
                for r in term.uses() {
                    if let Some(v) = r.as_vreg() {
                        if !defined_local.contains(&v) {
                            use_b[i].insert(v);
                        }
                    }
                }
            }
        }

        let mut live_in: Vec<HashSet<VReg>> = vec![HashSet::new(); n];
        let mut live_out: Vec<HashSet<VReg>> = vec![HashSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for i in (0..n).rev() {
                let mut new_out = HashSet::new();
                if let Some(term) = &vcode.blocks[i].terminator {
                    for succ in term.successors() {
                        new_out.extend(live_in[succ].iter().copied());
                    }
                }
                let mut new_in = use_b[i].clone();
                for v in new_out.iter() {
                    if !def_b[i].contains(v) {
                        new_in.insert(*v);
                    }
                }
                if new_in != live_in[i] || new_out != live_out[i] {
                    changed = true;
                }
                live_in[i] = new_in;
                live_out[i] = new_out;
            }
        }
        (live_in, live_out)
    }

    fn build_bundles(&mut self, vcode: &VCodeFunction, live_in: &[HashSet<VReg>], live_out: &[HashSet<VReg>]) {
        let mut acc: HashMap<VReg, (Vec<Range>, u64)> = HashMap::new();

        for (i, block) in vcode.blocks.iter().enumerate() {
            let start = self.block_start[i];
            let term_use_point = start + 2 * block.insts.len() as u32;
            let end = self.block_end[i];
            let depth_weight = 1u64 << self.loop_depth[i].min(8);

            let mut first_def: HashMap<VReg, u32> = HashMap::new();
            let mut last_use: HashMap<VReg, u32> = HashMap::new();

            for (j, inst) in block.insts.iter().enumerate() {
                let use_point = start + 2 * j as u32;
                let def_point = use_point + 1;
                for r in inst.uses() {
                    if let Some(v) = r.as_vreg() {
                        last_use.insert(v, use_point);
                        acc.entry(v).or_insert_with(|| (Vec::new(), 0)).1 += depth_weight;
                    }
                }
                for r in inst.defs() {
                    if let Some(v) = r.as_vreg() {
                        first_def.entry(v).or_insert(def_point);
                        acc.entry(v).or_insert_with(|| (Vec::new(), 0)).1 += depth_weight;
                    }
                }
            }
            if let Some(term) = &block.terminator {
                for r in term.uses() {
                    if let Some(v) = r.as_vreg() {
                        last_use.insert(v, term_use_point);
                        acc.entry(v).or_insert_with(|| (Vec::new(), 0)).1 += depth_weight;
                    }
                }
            }

            let mut vregs: HashSet<VReg> = HashSet::new();
            vregs.extend(live_in[i].iter().copied());
            vregs.extend(live_out[i].iter().copied());
            vregs.extend(first_def.keys().copied());
            vregs.extend(last_use.keys().copied());

            for v in vregs {
                let seg_start = if live_in[i].contains(&v) { start } else { *first_def.get(&v).unwrap_or(&start) };
                let seg_end = if live_out[i].contains(&v) {
                    end
                } else if let Some(&u) = last_use.get(&v) {
                    u + 1
                } else if let Some(&d) = first_def.get(&v) {
                    d + 1
                } else {
                    continue;
                };
                if seg_start >= seg_end {
                    continue;
                }
                acc.entry(v).or_insert_with(|| (Vec::new(), 0)).0.push(Range { start: seg_start, end: seg_end });
            }
        }

        for (idx, (vreg, (mut ranges, weight))) in acc.into_iter().enumerate() {
            ranges.sort_by_key(|r| r.start);
            merge_adjacent(&mut ranges);
            let bundle_idx = idx as u32;
            self.vreg_to_bundle.insert(vreg.index, bundle_idx);
            self.bundles.push(Bundle { vreg, ranges, weight, assigned: None, spill_slot: None });
        }
    }

    /// Merges bundles connected by a `Copy` of matching class whose ranges
    /// don't conflict, eliding the copy at rewrite time (§4.4 step 3).
    fn coalesce(&mut self, vcode: &VCodeFunction) {
        let mut parent: Vec<u32> = (0..self.bundles.len() as u32).collect();
        fn find(parent: &mut [u32], x: u32) -> u32 {
            if parent[x as usize] != x {
                parent[x as usize] = find(parent, parent[x as usize]);
            }
            parent[x as usize]
        }

        for (bi, block) in vcode.blocks.iter().enumerate() {
            for (ii, inst) in block.insts.iter().enumerate() {
                let VCodeInst::Copy { dst, src } = inst else { continue };
                let (Some(dv), Some(sv)) = (dst.as_vreg(), src.as_vreg()) else { continue };
                if dv.class != sv.class {
                    continue;
                }
                let db = find(&mut parent, self.vreg_to_bundle[&dv.index]);
                let sb = find(&mut parent, self.vreg_to_bundle[&sv.index]);
                if db == sb {
                    // Already the same bundle (prior merge this pass): still a
                    // no-op move once allocated, safe to drop.
                    self.coalesced.insert((bi, ii));
                    continue;
                }
                if ranges_overlap(&self.bundles[db as usize].ranges, &self.bundles[sb as usize].ranges) {
                    continue;
                }
                let (lo, hi) = if db < sb { (db, sb) } else { (sb, db) };
                let hi_ranges = std::mem::take(&mut self.bundles[hi as usize].ranges);
                let hi_weight = self.bundles[hi as usize].weight;
                self.bundles[lo as usize].ranges.extend(hi_ranges);
                self.bundles[lo as usize].ranges.sort_by_key(|r| r.start);
                merge_adjacent(&mut self.bundles[lo as usize].ranges);
                self.bundles[lo as usize].weight += hi_weight;
                parent[hi as usize] = lo;
                self.coalesced.insert((bi, ii));
            }
        }

        for b in self.vreg_to_bundle.values_mut() {
            *b = find(&mut parent, *b);
        }
    }

    /// Seeds every preg's occupancy with the fixed, un-evictable ranges
    /// imposed by bare `Reg::P` operands already present in the VCode
    /// (ABI parameter/return marshalling, cache-register reads, call
    /// clobber sets) — §4.4 step 8's "pre-colored bundles".
    fn seed_fixed_occupancy(&mut self, vcode: &VCodeFunction) {
        let mut seed = |p: PReg, point: u32, tracks: &mut HashMap<u8, PregTrack>| {
            tracks.entry(p.hw_enc).or_default().insert(
                &[Range { start: point, end: point + 1 }],
                u64::MAX,
                OccupantOwner::Fixed,
            );
        };
        for (i, block) in vcode.blocks.iter().enumerate() {
            let start = self.block_start[i];
            for (j, inst) in block.insts.iter().enumerate() {
                let use_point = start + 2 * j as u32;
                let def_point = use_point + 1;
                for r in inst.uses() {
                    if let Some(p) = r.as_preg() {
                        match p.class {
                            RegClass::Int => seed(p, use_point, &mut self.int_tracks),
                            RegClass::Float => seed(p, use_point, &mut self.float_tracks),
                        }
                    }
                }
                for r in inst.defs() {
                    if let Some(p) = r.as_preg() {
                        match p.class {
                            RegClass::Int => seed(p, def_point, &mut self.int_tracks),
                            RegClass::Float => seed(p, def_point, &mut self.float_tracks),
                        }
                    }
                }
                for p in inst.clobbers() {
                    match p.class {
                        RegClass::Int => seed(*p, def_point, &mut self.int_tracks),
                        RegClass::Float => seed(*p, def_point, &mut self.float_tracks),
                    }
                }
            }
            let term_use_point = start + 2 * block.insts.len() as u32;
            if let Some(term) = &block.terminator {
                for r in term.uses() {
                    if let Some(p) = r.as_preg() {
                        match p.class {
                            RegClass::Int => seed(p, term_use_point, &mut self.int_tracks),
                            RegClass::Float => seed(p, term_use_point, &mut self.float_tracks),
                        }
                    }
                }
            }
        }
    }

    fn candidate_pregs(class: RegClass) -> Vec<PReg> {
        match class {
            RegClass::Int => {
                let mut v = regs::int_preferred().to_vec();
                v.extend(regs::int_non_preferred().iter().copied());
                v
            }
            RegClass::Float => {
                // last two float non-preferred regs are reserved as spill
                // scratch (see FLOAT_SCRATCH0/1) and never handed out.
                let mut v = regs::float_preferred().to_vec();
                v.extend(regs::float_non_preferred()[..6].iter().copied());
                v
            }
        }
    }

    fn track_mut(&mut self, p: PReg) -> &mut PregTrack {
        match p.class {
            RegClass::Int => self.int_tracks.entry(p.hw_enc).or_default(),
            RegClass::Float => self.float_tracks.entry(p.hw_enc).or_default(),
        }
    }

    fn place_bundles(&mut self) -> CompileResult<()> {
        let mut queue: Vec<u32> = (0..self.bundles.len() as u32).collect();
        // Process representative bundles only once per id (coalescing may
        // have left stale indices unreachable; `assigned`/`spill_slot` are
        // only ever read off the union-find root via `vreg_to_bundle`).
        queue.retain(|&b| !self.bundles[b as usize].ranges.is_empty());
        queue.sort_by(|&a, &b| {
            self.bundles[b as usize]
                .weight
                .cmp(&self.bundles[a as usize].weight)
                .then_with(|| self.bundles[a as usize].vreg.index.cmp(&self.bundles[b as usize].vreg.index))
        });
        let mut queue: std::collections::VecDeque<u32> = queue.into();

        let mut guard = 0u32;
        while let Some(bidx) = queue.pop_front() {
            guard += 1;
            if guard > 1_000_000 {
                return Err(CompileError::InternalError("register allocator did not converge".into()));
            }
            if self.bundles[bidx as usize].assigned.is_some() || self.bundles[bidx as usize].spill_slot.is_some() {
                continue;
            }
            let class = self.bundles[bidx as usize].vreg.class;
            let weight = self.bundles[bidx as usize].weight;
            let ranges = self.bundles[bidx as usize].ranges.clone();

            let mut placed = false;
            let mut best_evict: Option<(PReg, Vec<usize>)> = None;
            for preg in Self::candidate_pregs(class) {
                let track = self.track_mut(preg);
                let conflicts = track.conflict_indices(&ranges);
                if conflicts.is_empty() {
                    track.insert(&ranges, weight, OccupantOwner::Bundle(bidx));
                    self.bundles[bidx as usize].assigned = Some(preg);
                    trace!("regalloc: v{} -> {:?}", self.bundles[bidx as usize].vreg.index, preg);
                    placed = true;
                    break;
                }
                let all_evictable = conflicts.iter().all(|&ci| {
                    matches!(track.occupants[ci].owner, OccupantOwner::Bundle(_)) && track.occupants[ci].weight < weight
                });
                if all_evictable && best_evict.as_ref().map(|(_, c)| conflicts.len() < c.len()).unwrap_or(true) {
                    best_evict = Some((preg, conflicts));
                }
            }

            if placed {
                continue;
            }

            if let Some((preg, conflict_indices)) = best_evict {
                let track = self.track_mut(preg);
                let mut evicted: Vec<u32> = conflict_indices
                    .iter()
                    .filter_map(|&ci| match track.occupants[ci].owner {
                        OccupantOwner::Bundle(b) => Some(b),
                        OccupantOwner::Fixed => None,
                    })
                    .collect();
                evicted.sort_unstable();
                evicted.dedup();
                for &b in &evicted {
                    track.remove_bundle(b);
                }
                track.insert(&ranges, weight, OccupantOwner::Bundle(bidx));
                self.bundles[bidx as usize].assigned = Some(preg);
                trace!(
                    "regalloc: v{} evicts {:?} to take {:?}",
                    self.bundles[bidx as usize].vreg.index, evicted, preg
                );
                for b in evicted {
                    self.bundles[b as usize].assigned = None;
                    self.evictions += 1;
                    queue.push_back(b);
                }
                continue;
            }

            // No register available anywhere: spill to a fresh stack slot,
            // reloaded at each use and stored after each def (§4.4 step 6).
            let slot = self.next_spill_slot;
            self.next_spill_slot += 1;
            self.bundles[bidx as usize].spill_slot = Some(slot);
            debug!(
                "regalloc: v{} spilled to slot {} (weight={})",
                self.bundles[bidx as usize].vreg.index, slot, weight
            );
        }
        Ok(())
    }

    fn callee_saved_used(&self) -> Vec<PReg> {
        let mut out = Vec::new();
        for b in &self.bundles {
            if let Some(p) = b.assigned {
                if regs::is_callee_saved(p) && !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        out
    }

    fn resolve(&self, v: VReg) -> (Option<PReg>, Option<u32>) {
        let b = &self.bundles[self.vreg_to_bundle[&v.index] as usize];
        (b.assigned, b.spill_slot)
    }

    fn rewrite(&mut self, vcode: &mut VCodeFunction) -> CompileResult<()> {
        for (bi, block) in vcode.blocks.iter_mut().enumerate() {
            let mut new_insts = Vec::with_capacity(block.insts.len());
            for (ii, mut inst) in std::mem::take(&mut block.insts).into_iter().enumerate() {
                if self.coalesced.contains(&(bi, ii)) {
                    continue;
                }
                if let VCodeInst::Call { .. } | VCodeInst::CallIndirect { .. } = &inst {
                    self.rewrite_call(&mut inst, &mut new_insts)?;
                    new_insts.push(inst);
                    continue;
                }
                let post_store = self.rewrite_generic(&mut inst, &mut new_insts)?;
                new_insts.push(inst);
                if let Some(store) = post_store {
                    new_insts.push(store);
                }
            }
            block.insts = new_insts;
            if let Some(term) = &mut block.terminator {
                let mut pre = Vec::new();
                self.rewrite_term(term, &mut pre)?;
                block.insts.extend(pre);
            }
        }
        Ok(())
    }

    /// Generic path: at most one def register and a handful of use
    /// registers per instruction. Spilled operands are reloaded into a
    /// small scratch pair (X16/X17 for ints, D14/D15 for floats) right
    /// before the instruction and stored back right after; instructions
    /// needing more than two distinct spilled operands of one class (only
    /// `Madd`/`Msub`/`Msub2`, which read three registers) are outside this
    /// budget and reported rather than silently mis-scheduled.
    fn rewrite_generic(&self, inst: &mut VCodeInst, out: &mut Vec<VCodeInst>) -> CompileResult<Option<VCodeInst>> {
        let uses = inst.uses();
        let defs = inst.defs();
        let mut int_spill_order: Vec<VReg> = Vec::new();
        let mut float_spill_order: Vec<VReg> = Vec::new();
        for r in uses.iter().chain(defs.iter()) {
            if let Some(v) = r.as_vreg() {
                let (assigned, slot) = self.resolve(v);
                if assigned.is_none() && slot.is_some() {
                    let list = match v.class {
                        RegClass::Int => &mut int_spill_order,
                        RegClass::Float => &mut float_spill_order,
                    };
                    if !list.contains(&v) {
                        list.push(v);
                    }
                }
            }
        }
        if int_spill_order.len() > 2 || float_spill_order.len() > 2 {
            return Err(CompileError::InternalError(format!(
                "too many simultaneously spilled operands on one instruction: {:?}",
                inst
            )));
        }
        let int_scratch = [regs::SCRATCH0, regs::SCRATCH1];
        let float_scratch = [FLOAT_SCRATCH0, FLOAT_SCRATCH1];
        let mut scratch_of: HashMap<u32, PReg> = HashMap::new();
        for (i, v) in int_spill_order.iter().enumerate() {
            scratch_of.insert(v.index, int_scratch[i]);
        }
        for (i, v) in float_spill_order.iter().enumerate() {
            scratch_of.insert(v.index, float_scratch[i]);
        }

        // Reload uses (skip registers that are also defs here; our ISA never
        // aliases a def vreg with a use vreg, so every spilled use is a pure
        // read and must be loaded before the instruction executes).
        for r in &uses {
            if let Some(v) = r.as_vreg() {
                if let Some(&scratch) = scratch_of.get(&v.index) {
                    out.push(VCodeInst::SpillLoad { dst: Reg::P(scratch), slot: self.bundles[self.vreg_to_bundle[&v.index] as usize].spill_slot.unwrap() });
                }
            }
        }

        let mut def_spill: Option<(VReg, PReg)> = None;
        for r in &defs {
            if let Some(v) = r.as_vreg() {
                if let Some(&scratch) = scratch_of.get(&v.index) {
                    def_spill = Some((v, scratch));
                }
            }
        }

        inst.map_regs_mut(|r| {
            if let Some(v) = r.as_vreg() {
                if let Some(&scratch) = scratch_of.get(&v.index) {
                    *r = Reg::P(scratch);
                } else if let Some(p) = self.bundles[self.vreg_to_bundle[&v.index] as usize].assigned {
                    *r = Reg::P(p);
                }
            }
        });

        if let Some((v, scratch)) = def_spill {
            let slot = self.bundles[self.vreg_to_bundle[&v.index] as usize].spill_slot.unwrap();
            // Must land after `inst` itself, which the caller hasn't pushed
            // yet, so hand it back instead of appending to `out` directly.
            return Ok(Some(VCodeInst::SpillStore { src: Reg::P(scratch), slot }));
        }
        Ok(None)
    }

    /// Call/indirect-call sites marshal each argument position directly
    /// into its ABI register (X0-X7/D0-D7) rather than a shared scratch
    /// pair, since `arg_regs` is read positionally as a whole and a shared
    /// scratch would silently alias distinct spilled arguments together.
    fn rewrite_call(&self, inst: &mut VCodeInst, out: &mut Vec<VCodeInst>) -> CompileResult<()> {
        let (arg_regs, callee) = match inst {
            VCodeInst::Call { arg_regs, .. } => (arg_regs, None),
            VCodeInst::CallIndirect { arg_regs, callee, .. } => (arg_regs, Some(callee)),
            _ => unreachable!(),
        };

        if let Some(callee) = callee {
            if let Some(v) = callee.as_vreg() {
                let (assigned, slot) = self.resolve(v);
                if let Some(p) = assigned {
                    *callee = Reg::P(p);
                } else if let Some(slot) = slot {
                    out.push(VCodeInst::SpillLoad { dst: Reg::P(regs::SCRATCH0), slot });
                    *callee = Reg::P(regs::SCRATCH0);
                }
            }
        }

        let mut next_int = 0usize;
        let mut next_float = 0usize;
        for r in arg_regs.iter_mut() {
            let Some(v) = r.as_vreg() else { continue };
            let (assigned, slot) = self.resolve(v);
            if let Some(p) = assigned {
                *r = Reg::P(p);
                continue;
            }
            let slot = slot.expect("vreg operand must be colored or spilled");
            let pos_reg = match v.class {
                RegClass::Int => {
                    let p = regs::int_arg_reg(next_int)
                        .ok_or_else(|| CompileError::InternalError("too many integer call arguments for register allocation".into()))?;
                    next_int += 1;
                    p
                }
                RegClass::Float => {
                    let p = regs::float_arg_reg(next_float)
                        .ok_or_else(|| CompileError::InternalError("too many float call arguments for register allocation".into()))?;
                    next_float += 1;
                    p
                }
            };
            out.push(VCodeInst::SpillLoad { dst: Reg::P(pos_reg), slot });
            *r = Reg::P(pos_reg);
        }
        // Recount ABI positions for already-colored args too, so the
        // emitter's positional X0-X7/D0-D7 move can see a consistent arity;
        // coloring does not change position, only which source register
        // each load pulls from, so no further action is needed here.
        let _ = (&mut next_int, &mut next_float);
        Ok(())
    }

    fn rewrite_term(&self, term: &mut crate::isa::aarch64::vcode::VCodeTerminator, out: &mut Vec<VCodeInst>) -> CompileResult<()> {
        let uses = term.uses();
        let mut int_spill_order: Vec<VReg> = Vec::new();
        for r in &uses {
            if let Some(v) = r.as_vreg() {
                if v.class == RegClass::Int {
                    let (assigned, slot) = self.resolve(v);
                    if assigned.is_none() && slot.is_some() && !int_spill_order.contains(&v) {
                        int_spill_order.push(v);
                    }
                }
            }
        }
        if int_spill_order.len() > 2 {
            return Err(CompileError::InternalError("too many simultaneously spilled terminator operands".into()));
        }
        let int_scratch = [regs::SCRATCH0, regs::SCRATCH1];
        let mut scratch_of: HashMap<u32, PReg> = HashMap::new();
        for (i, v) in int_spill_order.iter().enumerate() {
            scratch_of.insert(v.index, int_scratch[i]);
            let slot = self.bundles[self.vreg_to_bundle[&v.index] as usize].spill_slot.unwrap();
            out.push(VCodeInst::SpillLoad { dst: Reg::P(int_scratch[i]), slot });
        }
        term.map_regs_mut(|r| {
            if let Some(v) = r.as_vreg() {
                if let Some(&scratch) = scratch_of.get(&v.index) {
                    *r = Reg::P(scratch);
                } else if let Some(p) = self.bundles[self.vreg_to_bundle[&v.index] as usize].assigned {
                    *r = Reg::P(p);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::aarch64::vcode::{VCodeBlock, VCodeTerminator};

    fn vreg(vcode: &mut VCodeFunction, class: RegClass) -> Reg {
        vcode.new_vreg(class)
    }

    #[test]
    fn simple_straight_line_colors_without_spilling() {
        let mut vcode = VCodeFunction::default();
        vcode.blocks.push(VCodeBlock::default());
        let a = vreg(&mut vcode, RegClass::Int);
        let b = vreg(&mut vcode, RegClass::Int);
        let c = vreg(&mut vcode, RegClass::Int);
        vcode.blocks[0].insts.push(VCodeInst::MovZ { rd: a, imm: 1, shift: 0 });
        vcode.blocks[0].insts.push(VCodeInst::MovZ { rd: b, imm: 2, shift: 0 });
        vcode.blocks[0].insts.push(VCodeInst::AddReg { rd: c, rn: a, rm: b });
        vcode.blocks[0].terminator = Some(VCodeTerminator::Return { values: vec![] });

        let out = allocate(vcode).expect("allocation should succeed");
        for inst in &out.blocks[0].insts {
            for r in inst.uses().into_iter().chain(inst.defs()) {
                assert!(r.as_preg().is_some(), "expected all vregs colored, found {:?}", r);
            }
        }
        assert_eq!(out.spill_slot_count, 0);
    }

    #[test]
    fn high_pressure_block_forces_a_spill() {
        let mut vcode = VCodeFunction::default();
        vcode.blocks.push(VCodeBlock::default());
        // More simultaneously-live int values than the allocatable class
        // has registers, all kept alive through a final use so none can
        // be retired early.
        let mut vregs = Vec::new();
        for i in 0..20 {
            let v = vreg(&mut vcode, RegClass::Int);
            vcode.blocks[0].insts.push(VCodeInst::MovZ { rd: v, imm: i, shift: 0 });
            vregs.push(v);
        }
        let mut acc = vregs[0];
        for &v in &vregs[1..] {
            let next = vreg(&mut vcode, RegClass::Int);
            vcode.blocks[0].insts.push(VCodeInst::AddReg { rd: next, rn: acc, rm: v });
            acc = next;
        }
        vcode.blocks[0].terminator = Some(VCodeTerminator::Return { values: vec![] });

        let report_vcode = allocate(vcode).expect("allocation should succeed under pressure");
        assert!(report_vcode.spill_slot_count > 0, "expected at least one spill under register pressure");
    }

    #[test]
    fn coalesced_copy_is_removed_when_ranges_agree() {
        let mut vcode = VCodeFunction::default();
        vcode.blocks.push(VCodeBlock::default());
        let a = vreg(&mut vcode, RegClass::Int);
        let b = vreg(&mut vcode, RegClass::Int);
        let c = vreg(&mut vcode, RegClass::Int);
        vcode.blocks[0].insts.push(VCodeInst::MovZ { rd: a, imm: 5, shift: 0 });
        vcode.blocks[0].insts.push(VCodeInst::Copy { dst: b, src: a });
        vcode.blocks[0].insts.push(VCodeInst::Neg { rd: c, rn: b });
        vcode.blocks[0].terminator = Some(VCodeTerminator::Return { values: vec![] });
        let before = vcode.blocks[0].insts.len();

        let out = allocate(vcode).expect("allocation should succeed");
        assert!(out.blocks[0].insts.len() <= before);
    }
}
