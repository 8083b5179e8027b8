use serde::{Deserialize, Serialize};

use crate::message::comm::Communicator;




/**
 * Scalar running-statistics accumulator. Observables are added by
 * subscription (average, sum, max, integer-sum), which returns a stable
 * slot index used by all later gather calls. Each accumulator keeps two
 * views per slot: the running value, folded cell-by-cell during the
 * current pass, and the public value, frozen at the previous `evaluate`
 * and read by consumers. Public values are only overwritten as a single
 * step at `evaluate` or combine time.
 */
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockStatistics {
    running_average: Vec<(f64, u64)>,
    running_sum: Vec<f64>,
    running_max: Vec<f64>,
    running_int_sum: Vec<i64>,
    running_cells: u64,
    public_average: Vec<f64>,
    public_sum: Vec<f64>,
    public_max: Vec<f64>,
    public_int_sum: Vec<i64>,
    public_cells: u64,
}




// ============================================================================
impl BlockStatistics {


    pub fn new() -> Self {
        Self::default()
    }


    pub fn subscribe_average(&mut self) -> usize {
        self.running_average.push((0.0, 0));
        self.public_average.push(0.0);
        self.public_average.len() - 1
    }


    pub fn subscribe_sum(&mut self) -> usize {
        self.running_sum.push(0.0);
        self.public_sum.push(0.0);
        self.public_sum.len() - 1
    }


    pub fn subscribe_max(&mut self) -> usize {
        self.running_max.push(f64::NEG_INFINITY);
        self.public_max.push(f64::NEG_INFINITY);
        self.public_max.len() - 1
    }


    pub fn subscribe_int_sum(&mut self) -> usize {
        self.running_int_sum.push(0);
        self.public_int_sum.push(0);
        self.public_int_sum.len() - 1
    }


    /**
     * Fold one contribution into the running mean of the given slot.
     */
    pub fn gather_average(&mut self, slot: usize, value: f64) {
        let (mean, count) = &mut self.running_average[slot];
        *count += 1;
        *mean += (value - *mean) / *count as f64;
    }


    pub fn gather_sum(&mut self, slot: usize, value: f64) {
        self.running_sum[slot] += value;
    }


    pub fn gather_max(&mut self, slot: usize, value: f64) {
        let current = &mut self.running_max[slot];
        *current = current.max(value);
    }


    pub fn gather_int_sum(&mut self, slot: usize, value: i64) {
        self.running_int_sum[slot] += value;
    }


    /**
     * Advance the per-block cell counter. Called once per cell visited
     * during the current pass; the counter is the weight of this block's
     * averages when accumulators are combined.
     */
    pub fn increment_stats(&mut self) {
        self.running_cells += 1;
    }


    /**
     * Publish the running values and reset them to their neutral elements.
     * Consumers reading public values never observe a half-updated state:
     * this is the only place public values change.
     */
    pub fn evaluate(&mut self) {
        for (slot, (mean, count)) in self.running_average.iter_mut().enumerate() {
            self.public_average[slot] = *mean;
            *mean = 0.0;
            *count = 0;
        }
        for (slot, sum) in self.running_sum.iter_mut().enumerate() {
            self.public_sum[slot] = *sum;
            *sum = 0.0;
        }
        for (slot, max) in self.running_max.iter_mut().enumerate() {
            self.public_max[slot] = *max;
            *max = f64::NEG_INFINITY;
        }
        for (slot, sum) in self.running_int_sum.iter_mut().enumerate() {
            self.public_int_sum[slot] = *sum;
            *sum = 0;
        }
        self.public_cells = self.running_cells;
        self.running_cells = 0;
    }


    /**
     * Overwrite this accumulator's public view with another one's, leaving
     * the running view untouched. Used to redistribute a combined global
     * result back to every block.
     */
    pub fn overwrite_public_from(&mut self, other: &Self) {
        assert!(self.same_shape(other), "statistics subscriptions differ");

        self.public_average.copy_from_slice(&other.public_average);
        self.public_sum.copy_from_slice(&other.public_sum);
        self.public_max.copy_from_slice(&other.public_max);
        self.public_int_sum.copy_from_slice(&other.public_int_sum);
        self.public_cells = other.public_cells;
    }


    /**
     * A same-shape accumulator whose every slot holds its neutral element.
     * Used by processes holding no resident block, so they still take part
     * in a cross-process combine.
     */
    pub fn neutral_clone(&self) -> Self {
        Self {
            running_average: vec![(0.0, 0); self.running_average.len()],
            running_sum: vec![0.0; self.running_sum.len()],
            running_max: vec![f64::NEG_INFINITY; self.running_max.len()],
            running_int_sum: vec![0; self.running_int_sum.len()],
            running_cells: 0,
            public_average: vec![0.0; self.public_average.len()],
            public_sum: vec![0.0; self.public_sum.len()],
            public_max: vec![f64::NEG_INFINITY; self.public_max.len()],
            public_int_sum: vec![0; self.public_int_sum.len()],
            public_cells: 0,
        }
    }


    pub fn average(&self, slot: usize) -> f64 {
        self.public_average[slot]
    }


    pub fn sum(&self, slot: usize) -> f64 {
        self.public_sum[slot]
    }


    pub fn max(&self, slot: usize) -> f64 {
        self.public_max[slot]
    }


    pub fn int_sum(&self, slot: usize) -> i64 {
        self.public_int_sum[slot]
    }


    pub fn num_cells(&self) -> u64 {
        self.public_cells
    }


    fn same_shape(&self, other: &Self) -> bool {
        self.public_average.len() == other.public_average.len() &&
        self.public_sum.len() == other.public_sum.len() &&
        self.public_max.len() == other.public_max.len() &&
        self.public_int_sum.len() == other.public_int_sum.len()
    }
}




/**
 * Fold the public views of many per-block accumulators into one global
 * accumulator: averages combine as means weighted by each block's cell
 * count, sums and integer-sums add, maxima take the max. The inputs must
 * share the same subscription shape.
 */
pub fn combine<'a, I>(accumulators: I) -> BlockStatistics
where
    I: IntoIterator<Item = &'a BlockStatistics>
{
    let mut accumulators = accumulators.into_iter();
    let mut result = match accumulators.next() {
        Some(first) => first.clone(),
        None => return BlockStatistics::new(),
    };

    for acc in accumulators {
        assert!(result.same_shape(acc), "statistics subscriptions differ");

        let w0 = result.public_cells as f64;
        let w1 = acc.public_cells as f64;
        let total = w0 + w1;

        for (slot, value) in acc.public_average.iter().enumerate() {
            result.public_average[slot] = if total > 0.0 {
                (result.public_average[slot] * w0 + value * w1) / total
            } else {
                0.0
            };
        }
        for (slot, value) in acc.public_sum.iter().enumerate() {
            result.public_sum[slot] += value;
        }
        for (slot, value) in acc.public_max.iter().enumerate() {
            result.public_max[slot] = result.public_max[slot].max(*value);
        }
        for (slot, value) in acc.public_int_sum.iter().enumerate() {
            result.public_int_sum[slot] += value;
        }
        result.public_cells += acc.public_cells;
    }
    result
}




/**
 * Merge a locally combined accumulator with its counterparts on every
 * other process, using the transport's all-reduce over MessagePack-encoded
 * payloads. Every rank returns the same global result.
 */
pub fn combine_across<C: Communicator>(comm: &C, local: &BlockStatistics) -> BlockStatistics {
    let payload = rmp_serde::encode::to_vec(local).unwrap();
    let merged = comm.all_reduce(
        |a, b| {
            let a: BlockStatistics = rmp_serde::decode::from_slice(&a).unwrap();
            let b: BlockStatistics = rmp_serde::decode::from_slice(&b).unwrap();
            rmp_serde::encode::to_vec(&combine([&a, &b].iter().copied())).unwrap()
        },
        payload);

    rmp_serde::decode::from_slice(&merged).unwrap()
}
