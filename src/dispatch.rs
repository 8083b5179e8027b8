use crate::block::AtomicBlock;
use crate::geometry::Box2D;
use crate::multi_block::MultiBlock;
use crate::processor::{
    Applicability, Modification, ProcessorSpec, ReductiveProcessorSpec, StagedProcessor,
};
use crate::statistics::{self, BlockStatistics};




/**
 * One ready-to-run operation instance: a sub-box which is simultaneously
 * covered, in matching global coordinates, by one block from every
 * participant, plus that block id per participant.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchTuple {
    pub domain: Box2D,
    pub blocks: Vec<usize>,
}




/**
 * The result of decomposing one processor spec over a participant list:
 * the dispatch tuples, and the participants whose envelopes must be
 * refreshed once the tuples have run.
 */
pub struct Decomposition {
    pub tuples: Vec<DispatchTuple>,
    pub requires_update: Vec<usize>,
}




/**
 * Decompose an operation over an ordered list of participant grids.
 *
 * The reference participant for boundary inclusion is the written one if
 * exactly one is written, else the first. Writing more than one
 * participant while the applicability includes the envelope cannot be made
 * consistent and aborts in every build. Candidate sub-boxes are collected
 * per participant (bulk, bulk-plus-envelope, or envelope ring according to
 * the applicability; non-reference participants always contribute their
 * full envelopes so the reference's ghost regions can find them), trimmed
 * of duplicate coverage for read-only participants, and intersected across
 * all participants. With envelope applicability, the whole procedure is
 * repeated for every periodic image of the target box enabled on the
 * reference.
 */
pub fn decompose(
    domain: Box2D,
    applicability: Applicability,
    pattern: &[Modification],
    participants: &[&MultiBlock]) -> Decomposition
{
    assert!(!participants.is_empty(), "an operation needs at least one participant");
    assert!(
        pattern.len() == participants.len(),
        "modification pattern names {} participants but {} were given",
        pattern.len(), participants.len());

    let written: Vec<usize> = pattern
        .iter()
        .enumerate()
        .filter(|(_, m)| **m == Modification::Variables)
        .map(|(k, _)| k)
        .collect();

    if applicability.includes_envelope() && written.len() > 1 {
        panic!("an operation covering envelopes may write at most one participant, \
                but this one writes {}", written.len());
    }
    let reference = if written.len() == 1 { written[0] } else { 0 };

    let requires_update = if applicability.includes_envelope() {
        Vec::new()
    } else {
        written.clone()
    };

    let mut tuples = tuples_for(domain, applicability, reference, &written, participants);

    if applicability.includes_envelope() {
        let extent = participants[reference].bounding_box();
        let (px, py) = participants[reference].periodicity();
        let mut images = Vec::new();

        if px {
            images.push((-extent.nx(), 0));
            images.push((extent.nx(), 0));
        }
        if py {
            images.push((0, -extent.ny()));
            images.push((0, extent.ny()));
        }
        if px && py {
            for &dx in &[-extent.nx(), extent.nx()] {
                for &dy in &[-extent.ny(), extent.ny()] {
                    images.push((dx, dy));
                }
            }
        }
        for (dx, dy) in images {
            tuples.extend(tuples_for(
                domain.shift(dx, dy), applicability, reference, &written, participants));
        }
    }

    Decomposition { tuples, requires_update }
}


fn tuples_for(
    domain: Box2D,
    applicability: Applicability,
    reference: usize,
    written: &[usize],
    participants: &[&MultiBlock]) -> Vec<DispatchTuple>
{
    let mut candidate_sets = Vec::new();

    for (k, participant) in participants.iter().enumerate() {
        let distribution = participant.distribution();
        let mut candidates = Vec::new();

        for id in 0..distribution.num_blocks() {
            let p = distribution.parameters(id);

            if k == reference {
                match applicability {
                    Applicability::Bulk => {
                        candidates.push((p.bulk, id));
                    }
                    Applicability::BulkAndEnvelope => {
                        candidates.push((p.envelope, id));
                    }
                    Applicability::EnvelopeOnly => {
                        for ring in p.envelope.minus(&p.bulk) {
                            candidates.push((ring, id));
                        }
                    }
                }
            } else {
                candidates.push((p.envelope, id));
            }
        }

        if k == reference {
            candidates = candidates
                .into_iter()
                .filter_map(|(b, id)| Box2D::intersection(&b, &domain).map(|b| (b, id)))
                .collect();
        }

        // A read-only region must be taken from exactly one candidate:
        // envelope duplication already made the ghost copies consistent,
        // so any one copy serves, and duplicates would dispatch the same
        // region more than once.
        if !written.contains(&k) {
            candidates = trim_duplicate_coverage(candidates);
        }
        candidate_sets.push(candidates);
    }

    let mut tuples: Vec<DispatchTuple> = candidate_sets[0]
        .iter()
        .map(|&(domain, id)| DispatchTuple { domain, blocks: vec![id] })
        .collect();

    for candidates in &candidate_sets[1..] {
        tuples = tuples
            .iter()
            .flat_map(|t| candidates.iter().filter_map(move |&(b, id)| {
                Box2D::intersection(&t.domain, &b).map(|domain| {
                    let mut blocks = t.blocks.clone();
                    blocks.push(id);
                    DispatchTuple { domain, blocks }
                })
            }))
            .collect();
    }
    tuples
}


fn trim_duplicate_coverage(candidates: Vec<(Box2D, usize)>) -> Vec<(Box2D, usize)> {
    let mut used: Vec<Box2D> = Vec::new();
    let mut result = Vec::new();

    for (candidate, id) in candidates {
        let mut parts = vec![candidate];

        for u in &used {
            parts = parts.iter().flat_map(|p| p.minus(u)).collect();
        }
        for part in parts {
            used.push(part);
            result.push((part, id));
        }
    }
    result
}


/**
 * Lift every block of one tuple out of its slot, in participant order.
 * Taking ownership keeps the per-tuple mutation disjoint without any
 * locking: a block is mutated only while it is held here.
 */
fn take_tuple_blocks(tuple: &DispatchTuple, participants: &mut [&mut MultiBlock]) -> Vec<AtomicBlock> {
    tuple.blocks
        .iter()
        .enumerate()
        .map(|(k, &id)| participants[k].take_block(id))
        .collect()
}


fn restore_tuple_blocks(
    tuple: &DispatchTuple,
    participants: &mut [&mut MultiBlock],
    mut blocks: Vec<AtomicBlock>)
{
    for (k, &id) in tuple.blocks.iter().enumerate().rev() {
        participants[k].put_block(id, blocks.pop().unwrap());
    }
}


fn tuple_is_local(tuple: &DispatchTuple, participants: &[&mut MultiBlock]) -> bool {
    tuple.blocks
        .iter()
        .enumerate()
        .all(|(k, &id)| participants[k].is_local(id))
}




/**
 * Run one operation immediately over every locally resident dispatch
 * tuple, then refresh the envelopes of whichever participants were
 * written without their envelopes having been covered by the operation
 * itself.
 */
pub fn execute_data_processors(spec: &ProcessorSpec, participants: &mut [&mut MultiBlock]) {
    let pattern = spec.op.modification_pattern();
    let decomposition = {
        let views: Vec<&MultiBlock> = participants.iter().map(|m| &**m).collect();
        decompose(spec.domain, spec.applicability, &pattern, &views)
    };

    for tuple in &decomposition.tuples {
        if tuple_is_local(tuple, participants) {
            let mut blocks = take_tuple_blocks(tuple, participants);
            spec.op.process(tuple.domain, &mut blocks);
            restore_tuple_blocks(tuple, participants, blocks);
        }
    }
    for &k in &decomposition.requires_update {
        participants[k].duplicate_overlaps();
    }
}




/**
 * Stage one operation instead of running it: each locally resident tuple
 * becomes a staged processor on the first participant's block, holding
 * (participant index, block id) references to its partner blocks. The
 * written participants are subscribed for an envelope refresh whenever
 * the given level runs. The later `execute_staged` sweep must be given
 * the same participants in the same order.
 */
pub fn add_internal_processors(
    spec: &ProcessorSpec,
    participants: &mut [&mut MultiBlock],
    level: i32)
{
    let pattern = spec.op.modification_pattern();
    let decomposition = {
        let views: Vec<&MultiBlock> = participants.iter().map(|m| &**m).collect();
        decompose(spec.domain, spec.applicability, &pattern, &views)
    };

    for tuple in &decomposition.tuples {
        if tuple_is_local(tuple, participants) {
            let partners = tuple.blocks[1..]
                .iter()
                .enumerate()
                .map(|(k, &id)| (k + 1, id))
                .collect();

            participants[0]
                .block_mut(tuple.blocks[0])
                .expect("staged tuple host block is not resident")
                .add_internal_processor(StagedProcessor {
                    domain: tuple.domain,
                    op: spec.op.clone(),
                    partners,
                }, level);
        }
    }
    for &k in &decomposition.requires_update {
        participants[k].request_refresh(level);
    }
}




/**
 * Run the operations staged at one level on the first participant's
 * blocks, including coupled ones, then refresh envelopes: the first
 * participant refreshes at level 0 and any participant refreshes at a
 * level it was subscribed for.
 */
pub fn execute_staged(participants: &mut [&mut MultiBlock], level: i32) {
    let num_blocks = participants[0].distribution().num_blocks();

    for id in 0..num_blocks {
        if !participants[0].is_local(id) {
            continue;
        }
        let staged = participants[0]
            .block_mut(id)
            .unwrap()
            .take_staged(level);

        for processor in &staged {
            let mut host = participants[0].take_block(id);

            if processor.partners.is_empty() {
                processor.op.process(processor.domain, std::slice::from_mut(&mut host));
            } else {
                let mut blocks = vec![host];
                for &(k, partner) in &processor.partners {
                    blocks.push(participants[k].take_block(partner));
                }
                processor.op.process(processor.domain, &mut blocks);

                for &(k, partner) in processor.partners.iter().rev() {
                    participants[k].put_block(partner, blocks.pop().unwrap());
                }
                host = blocks.pop().unwrap();
            }
            participants[0].put_block(id, host);
        }
        participants[0]
            .block_mut(id)
            .unwrap()
            .restore_staged(level, staged);
    }

    for (k, participant) in participants.iter_mut().enumerate() {
        if (k == 0 && level == 0) || participant.refresh_requested(level) {
            participant.duplicate_overlaps();
        }
    }
}




/**
 * Run a reductive operation. Dispatch follows the same decomposition with
 * bulk-only applicability (ghost cells never contribute to a statistic);
 * every tuple gathers into its own private accumulator, and the
 * accumulators are merged afterwards, across processes included, with the
 * result exposed on the spec.
 */
pub fn execute_reductive_processors(
    spec: &mut ReductiveProcessorSpec,
    participants: &mut [&mut MultiBlock])
{
    let pattern = spec.op.modification_pattern();
    let decomposition = {
        let views: Vec<&MultiBlock> = participants.iter().map(|m| &**m).collect();
        decompose(spec.domain, Applicability::Bulk, &pattern, &views)
    };

    let mut gathered: Vec<BlockStatistics> = Vec::new();

    for tuple in &decomposition.tuples {
        if tuple_is_local(tuple, participants) {
            let mut tuple_stats = BlockStatistics::new();
            spec.op.subscribe(&mut tuple_stats);

            let mut blocks = take_tuple_blocks(tuple, participants);
            spec.op.process(tuple.domain, &mut blocks, &mut tuple_stats);
            restore_tuple_blocks(tuple, participants, blocks);

            tuple_stats.evaluate();
            gathered.push(tuple_stats);
        }
    }

    let local = if gathered.is_empty() {
        let mut neutral = BlockStatistics::new();
        spec.op.subscribe(&mut neutral);
        neutral.evaluate();
        neutral
    } else {
        statistics::combine(gathered.iter())
    };

    let global = participants[0].combine_statistics(local);
    spec.set_statistics(global);

    for &k in &decomposition.requires_update {
        participants[k].duplicate_overlaps();
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;

    use crate::block::AtomicBlock;
    use crate::distribution::BlockDistribution;
    use crate::geometry::{box2d, Axis, Box2D};
    use crate::multi_block::MultiBlock;
    use crate::processor::{
        Applicability, GridOperation, Modification, ProcessorSpec,
        ReductiveGridOperation, ReductiveProcessorSpec,
    };
    use crate::statistics::BlockStatistics;
    use super::{decompose, execute_reductive_processors, trim_duplicate_coverage};

    #[derive(Clone)]
    struct AddScalar(f64);

    impl GridOperation for AddScalar {
        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
            for index in domain.iter() {
                for value in blocks[0].get_mut(index) {
                    *value += self.0;
                }
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Variables]
        }

        fn clone_box(&self) -> Box<dyn GridOperation> {
            Box::new(self.clone())
        }
    }

    /// Copies the first participant's values into the second one.
    #[derive(Clone)]
    struct CopyInto;

    impl GridOperation for CopyInto {
        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
            for index in domain.iter() {
                let value = blocks[0].get(index)[0];
                blocks[1].get_mut(index)[0] = value;
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Nothing, Modification::Variables]
        }

        fn clone_box(&self) -> Box<dyn GridOperation> {
            Box::new(self.clone())
        }
    }

    struct SumField;

    impl ReductiveGridOperation for SumField {
        fn subscribe(&self, statistics: &mut BlockStatistics) {
            statistics.subscribe_sum();
            statistics.subscribe_average();
        }

        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock], statistics: &mut BlockStatistics) {
            for index in domain.iter() {
                let value = blocks[0].get(index)[0];
                statistics.gather_sum(0, value);
                statistics.gather_average(0, value);
                statistics.increment_stats();
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Nothing]
        }
    }

    fn grid_with(distribution: BlockDistribution, value: f64) -> MultiBlock {
        let mut grid = MultiBlock::new(Arc::new(distribution), 1);
        for block in grid.local_blocks_mut() {
            let bulk = block.bulk();
            for index in bulk.iter() {
                block.get_mut(index)[0] = value;
            }
        }
        grid.duplicate_overlaps();
        grid
    }

    #[test]
    fn decomposition_covers_the_domain_exactly_once_in_bulk_mode() {
        let domain = box2d(0, 9, 0, 9);
        let grid = grid_with(BlockDistribution::regular(domain, 2, 2, 1, 1), 0.0);

        let dec = decompose(
            domain,
            Applicability::Bulk,
            &[Modification::Variables],
            &[&grid]);

        let covered: usize = dec.tuples.iter().map(|t| t.domain.num_cells()).sum();
        assert_eq!(covered, domain.num_cells());
        assert_eq!(dec.requires_update, vec![0]);
    }

    #[test]
    fn single_block_and_partitioned_grids_agree() {
        let domain = box2d(0, 9, 0, 9);
        let mut whole = grid_with(BlockDistribution::regular(domain, 1, 1, 1, 1), 1.0);
        let mut split = grid_with(BlockDistribution::regular(domain, 2, 2, 1, 1), 1.0);

        let spec = ProcessorSpec::new(domain, Applicability::Bulk, Box::new(AddScalar(3.5)));
        whole.execute_data_processor(&spec);
        split.execute_data_processor(&spec);

        for index in domain.iter() {
            let a = whole.local_blocks().find(|b| b.bulk().contains(index)).unwrap();
            let b = split.local_blocks().find(|b| b.bulk().contains(index)).unwrap();
            assert_eq!(a.get(index), b.get(index));
            assert_eq!(a.get(index)[0], 4.5);
        }
    }

    #[test]
    fn coupled_grids_with_different_partitionings_intersect_correctly() {
        let domain = box2d(0, 9, 0, 9);
        let mut source = grid_with(BlockDistribution::regular(domain, 1, 1, 1, 1), 0.0);
        let mut target = grid_with(BlockDistribution::regular(domain, 2, 2, 1, 1), 0.0);

        for block in source.local_blocks_mut() {
            let bulk = block.bulk();
            for index in bulk.iter() {
                block.get_mut(index)[0] = (index.0 * 10 + index.1) as f64;
            }
        }
        source.duplicate_overlaps();

        let spec = ProcessorSpec::new(domain, Applicability::Bulk, Box::new(CopyInto));
        crate::dispatch::execute_data_processors(&spec, &mut [&mut source, &mut target]);

        for index in domain.iter() {
            let b = target.local_blocks().find(|b| b.bulk().contains(index)).unwrap();
            assert_eq!(b.get(index)[0], (index.0 * 10 + index.1) as f64);
        }
    }

    #[test]
    fn reduction_counts_every_interior_cell_exactly_once() {
        let domain = box2d(0, 9, 0, 9);

        for (nx, ny) in &[(1, 1), (2, 2), (4, 1)] {
            let mut grid = grid_with(BlockDistribution::regular(domain, *nx, *ny, 1, 1), 2.0);

            let mut spec = ReductiveProcessorSpec::new(domain, Box::new(SumField));
            execute_reductive_processors(&mut spec, &mut [&mut grid]);

            // ghost cells hold valid duplicated data but must not be counted
            assert_eq!(spec.statistics().sum(0), 200.0);
            assert_eq!(spec.statistics().average(0), 2.0);
            assert_eq!(spec.statistics().num_cells(), 100);
        }
    }

    #[test]
    fn envelope_operations_cover_periodic_image_ghost_cells() {
        let domain = box2d(0, 9, 0, 4);
        let mut grid = grid_with(BlockDistribution::regular(domain, 2, 1, 1, 1), 0.0);
        grid.set_periodic(Axis::X, true);

        let spec = ProcessorSpec::new(
            domain, Applicability::BulkAndEnvelope, Box::new(AddScalar(1.0)));
        grid.execute_data_processor(&spec);

        let left = grid.block(0).unwrap();
        let right = grid.block(1).unwrap();
        for y in 0..5 {
            // the wraparound ghost columns are reached through image shifts
            assert_eq!(left.get((-1, y))[0], 1.0);
            assert_eq!(right.get((10, y))[0], 1.0);
            // seam ghost columns are covered exactly once by the base pass
            assert_eq!(left.get((5, y))[0], 1.0);
            assert_eq!(right.get((4, y))[0], 1.0);
        }
        // the y axis is not periodic, so those ghost rows stay untouched
        assert_eq!(left.get((0, -1))[0], 0.0);
    }

    #[test]
    fn coupled_staged_operations_run_through_the_staged_sweep() {
        let domain = box2d(0, 9, 0, 9);
        let mut source = grid_with(BlockDistribution::regular(domain, 2, 2, 1, 1), 5.0);
        let mut target = grid_with(BlockDistribution::regular(domain, 2, 2, 1, 1), 0.0);

        let spec = ProcessorSpec::new(domain, Applicability::Bulk, Box::new(CopyInto));
        crate::dispatch::add_internal_processors(&spec, &mut [&mut source, &mut target], 0);
        crate::dispatch::execute_staged(&mut [&mut source, &mut target], 0);

        for index in domain.iter() {
            let b = target.local_blocks().find(|b| b.bulk().contains(index)).unwrap();
            assert_eq!(b.get(index)[0], 5.0);
        }

        // the staged sweep also refreshed the written grid's envelopes
        for overlap in target.distribution().clone().overlaps() {
            let to = target.block(overlap.to_block).unwrap();
            for index in overlap.to_box.iter() {
                assert_eq!(to.get(index)[0], 5.0);
            }
        }
    }

    #[test]
    fn trimmed_candidates_cover_each_region_exactly_once() {
        // two overlapping envelopes of adjacent blocks
        let candidates = vec![
            (box2d(0, 6, 0, 4), 0),
            (box2d(4, 9, 0, 4), 1),
        ];
        let trimmed = trim_duplicate_coverage(candidates);

        let covered: usize = trimmed.iter().map(|(b, _)| b.num_cells()).sum();
        assert_eq!(covered, box2d(0, 9, 0, 4).num_cells());

        for (i, (a, _)) in trimmed.iter().enumerate() {
            for (b, _) in &trimmed[i + 1..] {
                assert_eq!(Box2D::intersection(a, b), None);
            }
        }
    }

    #[test]
    #[should_panic]
    fn writing_two_participants_with_envelope_applicability_panics() {
        #[derive(Clone)]
        struct WriteBoth;

        impl GridOperation for WriteBoth {
            fn process(&self, _: Box2D, _: &mut [AtomicBlock]) {}
            fn modification_pattern(&self) -> Vec<Modification> {
                vec![Modification::Variables, Modification::Variables]
            }
            fn clone_box(&self) -> Box<dyn GridOperation> {
                Box::new(WriteBoth)
            }
        }

        let domain = box2d(0, 9, 0, 9);
        let mut a = grid_with(BlockDistribution::regular(domain, 2, 1, 1, 1), 0.0);
        let mut b = grid_with(BlockDistribution::regular(domain, 1, 2, 1, 1), 0.0);

        let spec = ProcessorSpec::new(domain, Applicability::BulkAndEnvelope, Box::new(WriteBoth));
        crate::dispatch::execute_data_processors(&spec, &mut [&mut a, &mut b]);
    }
}
