use std::collections::BTreeMap;

use crate::geometry::Box2D;
use crate::processor::StagedProcessor;
use crate::statistics::BlockStatistics;




/**
 * One partition's grid storage, owned exclusively by a single process. The
 * backing array covers the bulk box plus the ghost-cell envelope, row-major,
 * with `num_fields` values per cell: a scalar field stores one value, a
 * tensor field d, a lattice its q populations. All sub-box arguments are in
 * global coordinates; the block translates internally against the lower
 * corner of its bounding box.
 *
 * A block also carries a queue of staged operations grouped by an integer
 * scheduling level, and its own statistics accumulator.
 */
pub struct AtomicBlock {
    id: usize,
    bulk: Box2D,
    bounding: Box2D,
    num_fields: usize,
    data: Vec<f64>,
    queue: BTreeMap<i32, Vec<StagedProcessor>>,
    statistics: BlockStatistics,
}




// ============================================================================
impl AtomicBlock {


    /**
     * Allocate a zero-filled block for the given bulk box and envelope
     * width.
     */
    pub fn new(id: usize, bulk: Box2D, envelope_width: i64, num_fields: usize) -> Self {

        assert!(num_fields > 0, "a block must store at least one value per cell");

        let bounding = bulk.enlarge(envelope_width);
        Self {
            id,
            bulk,
            bounding,
            num_fields,
            data: vec![0.0; bounding.num_cells() * num_fields],
            queue: BTreeMap::new(),
            statistics: BlockStatistics::new(),
        }
    }


    /**
     * Allocate a block with cell values defined from a closure over the
     * global index.
     */
    pub fn from_function<F>(id: usize, bulk: Box2D, envelope_width: i64, num_fields: usize, f: F) -> Self
    where
        F: Fn((i64, i64), &mut [f64])
    {
        let mut block = Self::new(id, bulk, envelope_width, num_fields);

        for index in block.bounding.iter() {
            let offset = block.bounding.row_major_offset(index) * num_fields;
            f(index, &mut block.data[offset..offset + num_fields]);
        }
        block
    }


    pub fn id(&self) -> usize {
        self.id
    }


    /**
     * The full stored region: bulk plus envelope.
     */
    pub fn bounding_box(&self) -> Box2D {
        self.bounding
    }


    pub fn bulk(&self) -> Box2D {
        self.bulk
    }


    /**
     * Number of values stored per cell.
     */
    pub fn cell_size(&self) -> usize {
        self.num_fields
    }


    pub fn get(&self, index: (i64, i64)) -> &[f64] {
        self.validate_index(index);
        let offset = self.bounding.row_major_offset(index) * self.num_fields;
        &self.data[offset..offset + self.num_fields]
    }


    pub fn get_mut(&mut self, index: (i64, i64)) -> &mut [f64] {
        self.validate_index(index);
        let offset = self.bounding.row_major_offset(index) * self.num_fields;
        &mut self.data[offset..offset + self.num_fields]
    }


    /**
     * Serialize a sub-box's cell data into a flat row-major buffer.
     */
    pub fn extract(&self, region: &Box2D) -> Vec<f64> {
        self.validate_region(region);

        let mut buffer = Vec::with_capacity(region.num_cells() * self.num_fields);
        for index in region.iter() {
            buffer.extend_from_slice(self.get(index));
        }
        buffer
    }


    /**
     * Deserialize a flat buffer back into a sub-box.
     */
    pub fn inject(&mut self, region: &Box2D, buffer: &[f64]) {
        self.validate_region(region);

        assert!(
            buffer.len() == region.num_cells() * self.num_fields,
            "buffer holds {} values but region {:?} needs {}",
            buffer.len(), region, region.num_cells() * self.num_fields);

        for (cell, index) in buffer.chunks_exact(self.num_fields).zip(region.iter()) {
            self.get_mut(index).copy_from_slice(cell);
        }
    }


    /**
     * Copy cell data from another block of the same cell size into a
     * sub-box of this one: for each index in `to_box`, the source cell is
     * at `index + offset` in the peer's frame.
     */
    pub fn attribute(&mut self, to_box: &Box2D, offset: (i64, i64), from: &AtomicBlock) {
        self.validate_region(to_box);

        assert!(
            self.num_fields == from.num_fields,
            "cannot attribute between blocks with cell sizes {} and {}",
            from.num_fields, self.num_fields);

        for index in to_box.iter() {
            let source = (index.0 + offset.0, index.1 + offset.1);
            self.get_mut(index).copy_from_slice(from.get(source));
        }
    }


    /**
     * The self-copy variant of `attribute`, for periodic overlaps which map
     * a block back onto itself.
     */
    pub fn attribute_self(&mut self, to_box: &Box2D, offset: (i64, i64)) {
        let buffer = self.extract(&to_box.shift(offset.0, offset.1));
        self.inject(to_box, &buffer);
    }


    pub fn statistics(&self) -> &BlockStatistics {
        &self.statistics
    }


    pub(crate) fn statistics_mut(&mut self) -> &mut BlockStatistics {
        &mut self.statistics
    }


    /**
     * Fold one cell's contribution into this block's statistics. Envelope
     * cells are non-counting: a contribution for a ghost cell is dropped
     * here, because the block holding that cell's bulk copy counts it.
     * An operation sweeping overlapping regions on several blocks still
     * counts every domain cell exactly once.
     */
    pub fn gather_average(&mut self, index: (i64, i64), slot: usize, value: f64) {
        if self.bulk.contains(index) {
            self.statistics.gather_average(slot, value);
        }
    }


    pub fn gather_sum(&mut self, index: (i64, i64), slot: usize, value: f64) {
        if self.bulk.contains(index) {
            self.statistics.gather_sum(slot, value);
        }
    }


    pub fn gather_max(&mut self, index: (i64, i64), slot: usize, value: f64) {
        if self.bulk.contains(index) {
            self.statistics.gather_max(slot, value);
        }
    }


    pub fn gather_int_sum(&mut self, index: (i64, i64), slot: usize, value: i64) {
        if self.bulk.contains(index) {
            self.statistics.gather_int_sum(slot, value);
        }
    }


    /**
     * Advance the cell counter, subject to the same non-counting rule.
     */
    pub fn increment_stats(&mut self, index: (i64, i64)) {
        if self.bulk.contains(index) {
            self.statistics.increment_stats();
        }
    }


    /**
     * Stage an operation at the given scheduling level. Staged operations
     * persist: every later execution of that level runs them again.
     */
    pub fn add_internal_processor(&mut self, processor: StagedProcessor, level: i32) {
        self.queue.entry(level).or_insert_with(Vec::new).push(processor)
    }


    /**
     * The levels currently holding at least one staged operation, in
     * ascending order.
     */
    pub fn subscribed_levels(&self) -> Vec<i32> {
        self.queue.keys().cloned().collect()
    }


    /**
     * Run the operations staged at exactly the given level. Operations
     * coupling blocks beyond this one cannot run here; they go through the
     * dispatch engine's staged sweep, which can assemble all of their
     * participants.
     */
    pub fn execute_internal_processors(&mut self, level: i32) {
        if let Some(staged) = self.queue.remove(&level) {
            for processor in &staged {
                assert!(
                    processor.partners.is_empty(),
                    "block {} holds a coupled staged operation at level {}; \
                     run it with dispatch::execute_staged", self.id, level);

                processor.op.process(processor.domain, std::slice::from_mut(self));
            }
            self.queue.insert(level, staged);
        }
    }


    /**
     * Run every subscribed level from the lowest upward.
     */
    pub fn execute_all_internal_processors(&mut self) {
        for level in self.subscribed_levels() {
            self.execute_internal_processors(level)
        }
    }


    pub(crate) fn take_staged(&mut self, level: i32) -> Vec<StagedProcessor> {
        self.queue.remove(&level).unwrap_or_default()
    }


    pub(crate) fn restore_staged(&mut self, level: i32, staged: Vec<StagedProcessor>) {
        if !staged.is_empty() {
            self.queue.insert(level, staged);
        }
    }


    fn validate_index(&self, index: (i64, i64)) {
        if !self.bounding.contains(index) {
            panic!("index ({} {}) out of range on block {} with bounding box {:?}",
                index.0, index.1, self.id, self.bounding);
        }
    }

    fn validate_region(&self, region: &Box2D) {
        if !self.bounding.contains_box(region) {
            panic!("region {:?} out of range on block {} with bounding box {:?}",
                region, self.id, self.bounding);
        }
    }
}
