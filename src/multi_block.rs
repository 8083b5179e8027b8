use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::block::AtomicBlock;
use crate::communicator::{BlockCommunicator, DirectCommunicator};
use crate::dispatch;
use crate::distribution::BlockDistribution;
use crate::geometry::{Axis, Box2D};
use crate::processor::{ProcessorSpec, ReductiveProcessorSpec};
use crate::statistics::{self, BlockStatistics};


static NEXT_GRID_ID: AtomicUsize = AtomicUsize::new(0);




/**
 * The distributed-grid façade: a sparse collection of atomic blocks (only
 * the ones whose home process is the current rank are resident), the
 * shared partition table, a block communicator, and the combined
 * statistics of the previous evaluation. Presents a single-grid-like
 * surface — bounding box, run an operation, evaluate statistics — which
 * internally fans out over the blocks.
 */
pub struct MultiBlock {
    id: usize,
    distribution: Arc<BlockDistribution>,
    rank: usize,
    periodicity: (bool, bool),
    blocks: Vec<Option<AtomicBlock>>,
    communicator: Box<dyn BlockCommunicator>,
    statistics: BlockStatistics,
    refresh_levels: BTreeSet<i32>,
}




// ============================================================================
impl MultiBlock {


    /**
     * Build a single-process grid: every block is resident and envelope
     * duplication is plain in-memory copying.
     */
    pub fn new(distribution: Arc<BlockDistribution>, num_fields: usize) -> Self {
        Self::with_communicator(distribution, num_fields, 0, Box::new(DirectCommunicator))
    }


    /**
     * Build the local share of a distributed grid: only the blocks whose
     * home process is `rank` are materialized, and the given communicator
     * carries the cross-process ghost traffic.
     */
    pub fn with_communicator(
        distribution: Arc<BlockDistribution>,
        num_fields: usize,
        rank: usize,
        communicator: Box<dyn BlockCommunicator>) -> Self
    {
        let blocks = (0..distribution.num_blocks())
            .map(|id| {
                let p = distribution.parameters(id);
                if p.process == rank {
                    Some(AtomicBlock::new(id, p.bulk, p.envelope_width, num_fields))
                } else {
                    None
                }
            })
            .collect();

        Self {
            id: NEXT_GRID_ID.fetch_add(1, Ordering::Relaxed),
            distribution,
            rank,
            periodicity: (false, false),
            blocks,
            communicator,
            statistics: BlockStatistics::new(),
            refresh_levels: BTreeSet::new(),
        }
    }


    pub fn distribution(&self) -> &Arc<BlockDistribution> {
        &self.distribution
    }


    pub fn bounding_box(&self) -> Box2D {
        self.distribution.domain()
    }


    pub fn rank(&self) -> usize {
        self.rank
    }


    pub fn periodicity(&self) -> (bool, bool) {
        self.periodicity
    }


    pub fn set_periodic(&mut self, axis: Axis, flag: bool) {
        match axis {
            Axis::X => self.periodicity.0 = flag,
            Axis::Y => self.periodicity.1 = flag,
        }
        self.communicator.signal_periodicity();
    }


    pub fn is_local(&self, block: usize) -> bool {
        self.blocks[block].is_some()
    }


    pub fn block(&self, block: usize) -> Option<&AtomicBlock> {
        self.blocks[block].as_ref()
    }


    pub fn block_mut(&mut self, block: usize) -> Option<&mut AtomicBlock> {
        self.blocks[block].as_mut()
    }


    /**
     * Iterate the locally resident blocks.
     */
    pub fn local_blocks(&self) -> impl Iterator<Item = &AtomicBlock> {
        self.blocks.iter().filter_map(|slot| slot.as_ref())
    }


    pub fn local_blocks_mut(&mut self) -> impl Iterator<Item = &mut AtomicBlock> {
        self.blocks.iter_mut().filter_map(|slot| slot.as_mut())
    }


    pub(crate) fn take_block(&mut self, block: usize) -> AtomicBlock {
        self.blocks[block]
            .take()
            .expect("dispatch tuple names a block which is not resident")
    }


    pub(crate) fn put_block(&mut self, block: usize, value: AtomicBlock) {
        debug_assert!(self.blocks[block].is_none());
        self.blocks[block] = Some(value)
    }


    pub(crate) fn request_refresh(&mut self, level: i32) {
        self.refresh_levels.insert(level);
    }


    pub(crate) fn refresh_requested(&self, level: i32) -> bool {
        self.refresh_levels.contains(&level)
    }


    pub(crate) fn combine_statistics(&self, local: BlockStatistics) -> BlockStatistics {
        self.communicator.combine_statistics(local)
    }


    /**
     * Make every resident block's envelope consistent with its neighbors'
     * interiors, honoring the current periodicity flags.
     */
    pub fn duplicate_overlaps(&mut self) {
        let Self { id, blocks, distribution, communicator, periodicity, .. } = self;
        communicator.duplicate_overlaps(*id, blocks, distribution, *periodicity);
    }


    /**
     * Run one operation immediately over this grid, refreshing envelopes
     * afterwards if the operation wrote them stale.
     */
    pub fn execute_data_processor(&mut self, spec: &ProcessorSpec) {
        dispatch::execute_data_processors(spec, &mut [self])
    }


    /**
     * Run a reductive operation over this grid; the merged statistics end
     * up on the spec.
     */
    pub fn execute_reductive_processor(&mut self, spec: &mut ReductiveProcessorSpec) {
        dispatch::execute_reductive_processors(spec, &mut [self])
    }


    /**
     * Stage one operation at the given scheduling level instead of
     * running it.
     */
    pub fn add_internal_processor(&mut self, spec: &ProcessorSpec, level: i32) {
        dispatch::add_internal_processors(spec, &mut [self], level)
    }


    /**
     * Run every staged level from the lowest upward, refreshing envelopes
     * between levels: side effects of level n are visible to level n + 1
     * within one sweep, never the reverse.
     */
    pub fn execute_internal_processors(&mut self) {
        let levels: BTreeSet<i32> = self
            .local_blocks()
            .flat_map(|b| b.subscribed_levels())
            .collect();

        for level in levels {
            self.execute_internal_processors_at(level)
        }
    }


    /**
     * Run the staged operations at exactly one level, in parallel across
     * the resident blocks (blocks are independently owned, so the sweep
     * needs no locking), then refresh envelopes: always after level 0,
     * and after any level a staged operation subscribed for refresh.
     */
    pub fn execute_internal_processors_at(&mut self, level: i32) {
        self.blocks
            .par_iter_mut()
            .filter_map(|slot| slot.as_mut())
            .for_each(|block| block.execute_internal_processors(level));

        if level == 0 || self.refresh_requested(level) {
            self.duplicate_overlaps();
        }
    }


    /**
     * Subscribe an average observable on every resident block; the
     * returned slot index is valid for the blocks and for the combined
     * result alike.
     */
    pub fn subscribe_average(&mut self) -> usize {
        let slot = self.statistics.subscribe_average();
        for block in self.local_blocks_mut() {
            assert_eq!(block.statistics_mut().subscribe_average(), slot);
        }
        slot
    }


    pub fn subscribe_sum(&mut self) -> usize {
        let slot = self.statistics.subscribe_sum();
        for block in self.local_blocks_mut() {
            assert_eq!(block.statistics_mut().subscribe_sum(), slot);
        }
        slot
    }


    pub fn subscribe_max(&mut self) -> usize {
        let slot = self.statistics.subscribe_max();
        for block in self.local_blocks_mut() {
            assert_eq!(block.statistics_mut().subscribe_max(), slot);
        }
        slot
    }


    pub fn subscribe_int_sum(&mut self) -> usize {
        let slot = self.statistics.subscribe_int_sum();
        for block in self.local_blocks_mut() {
            assert_eq!(block.statistics_mut().subscribe_int_sum(), slot);
        }
        slot
    }


    /**
     * Freeze every resident block's running statistics, merge them into
     * one global result (across processes when a transport is attached),
     * and redistribute that result so every block's public view agrees.
     */
    pub fn evaluate_statistics(&mut self) {
        for block in self.local_blocks_mut() {
            block.statistics_mut().evaluate();
        }

        let local = {
            let mut resident = self.local_blocks().map(|b| b.statistics()).peekable();
            if resident.peek().is_some() {
                statistics::combine(resident)
            } else {
                self.statistics.neutral_clone()
            }
        };
        let global = self.communicator.combine_statistics(local);

        for block in self.local_blocks_mut() {
            block.statistics_mut().overwrite_public_from(&global);
        }
        self.statistics = global;
    }


    /**
     * The combined result of the previous `evaluate_statistics`.
     */
    pub fn statistics(&self) -> &BlockStatistics {
        &self.statistics
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;

    use crate::block::AtomicBlock;
    use crate::distribution::BlockDistribution;
    use crate::geometry::{box2d, Axis, Box2D};
    use crate::processor::{Applicability, GridOperation, Modification, ProcessorSpec};
    use super::MultiBlock;

    #[derive(Clone)]
    struct AddScalar(f64);

    impl GridOperation for AddScalar {
        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
            for index in domain.iter() {
                blocks[0].get_mut(index)[0] += self.0;
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Variables]
        }

        fn clone_box(&self) -> Box<dyn GridOperation> {
            Box::new(self.clone())
        }
    }

    #[derive(Clone)]
    struct Double;

    impl GridOperation for Double {
        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
            for index in domain.iter() {
                blocks[0].get_mut(index)[0] *= 2.0;
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Variables]
        }

        fn clone_box(&self) -> Box<dyn GridOperation> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn staged_levels_run_in_order_within_one_sweep() {
        let domain = box2d(0, 9, 0, 9);
        let dist = BlockDistribution::regular(domain, 2, 2, 1, 1);
        let mut grid = MultiBlock::new(Arc::new(dist), 1);

        // (0 + 1) * 2 == 2 everywhere only if level 0 runs before level 1
        grid.add_internal_processor(
            &ProcessorSpec::new(domain, Applicability::Bulk, Box::new(AddScalar(1.0))), 0);
        grid.add_internal_processor(
            &ProcessorSpec::new(domain, Applicability::Bulk, Box::new(Double)), 1);

        grid.execute_internal_processors();

        for block in grid.local_blocks() {
            for index in block.bulk().iter() {
                assert_eq!(block.get(index)[0], 2.0);
            }
        }

        // staged operations persist: a second sweep applies them again
        grid.execute_internal_processors();
        for block in grid.local_blocks() {
            assert_eq!(block.get(block.bulk().iter().next().unwrap())[0], 6.0);
        }
    }

    #[test]
    fn envelopes_refresh_after_a_level_zero_sweep() {
        let domain = box2d(0, 9, 0, 9);
        let dist = BlockDistribution::regular(domain, 2, 2, 1, 1);
        let mut grid = MultiBlock::new(Arc::new(dist), 1);

        grid.add_internal_processor(
            &ProcessorSpec::new(domain, Applicability::Bulk, Box::new(AddScalar(7.0))), 0);
        grid.execute_internal_processors();

        for overlap in grid.distribution().clone().overlaps() {
            let to = grid.block(overlap.to_block).unwrap();
            for index in overlap.to_box.iter() {
                assert_eq!(to.get(index)[0], 7.0);
            }
        }
    }

    #[test]
    fn periodicity_flags_gate_the_wraparound_overlaps() {
        let domain = box2d(0, 9, 0, 4);
        let dist = BlockDistribution::regular(domain, 2, 1, 1, 1);
        let mut grid = MultiBlock::new(Arc::new(dist), 1);

        for block in grid.local_blocks_mut() {
            let bulk = block.bulk();
            for index in bulk.iter() {
                block.get_mut(index)[0] = index.0 as f64;
            }
        }

        grid.set_periodic(Axis::X, true);
        grid.duplicate_overlaps();

        let right = grid.block(1).unwrap();
        assert_eq!(right.get((10, 2))[0], 0.0);
        let left = grid.block(0).unwrap();
        assert_eq!(left.get((-1, 2))[0], 9.0);
    }

    /// Gathers one unit per visited cell into a subscribed sum slot.
    #[derive(Clone)]
    struct CountCells(usize);

    impl GridOperation for CountCells {
        fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
            for index in domain.iter() {
                blocks[0].gather_sum(index, self.0, 1.0);
                blocks[0].increment_stats(index);
            }
        }

        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Variables]
        }

        fn clone_box(&self) -> Box<dyn GridOperation> {
            Box::new(self.clone())
        }
    }

    #[test]
    fn envelope_cells_do_not_count_toward_statistics() {
        let domain = box2d(0, 9, 0, 9);
        let dist = BlockDistribution::regular(domain, 2, 2, 1, 1);
        let mut grid = MultiBlock::new(Arc::new(dist), 1);
        let slot = grid.subscribe_sum();

        // with envelope applicability, every block also sweeps its ghost
        // cells inside the domain (144 visits on this partition); only the
        // 100 bulk copies may reach the statistics
        let spec = ProcessorSpec::new(
            domain, Applicability::BulkAndEnvelope, Box::new(CountCells(slot)));
        grid.execute_data_processor(&spec);
        grid.evaluate_statistics();

        assert_eq!(grid.statistics().sum(slot), 100.0);
        assert_eq!(grid.statistics().num_cells(), 100);
    }

    #[test]
    fn statistics_subscription_mirrors_into_every_block() {
        let domain = box2d(0, 9, 0, 9);
        let dist = BlockDistribution::regular(domain, 2, 2, 1, 1);
        let mut grid = MultiBlock::new(Arc::new(dist), 1);

        let slot = grid.subscribe_sum();

        for (n, block) in grid.local_blocks_mut().enumerate() {
            block.statistics_mut().gather_sum(slot, (n + 1) as f64);
            block.statistics_mut().increment_stats();
        }
        grid.evaluate_statistics();

        assert_eq!(grid.statistics().sum(slot), 10.0);
        for block in grid.local_blocks() {
            assert_eq!(block.statistics().sum(slot), 10.0);
        }
    }
}
