use serde::{Deserialize, Serialize};

use crate::geometry::Box2D;




/**
 * Per-block geometry record: the interior ("bulk") box owned exclusively by
 * one block, the surrounding envelope box (bulk plus the ghost-cell ring),
 * the envelope width, and the rank of the process which owns the block's
 * data. Created once at partition time and never mutated.
 */
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BlockParameters {
    pub bulk: Box2D,
    pub envelope: Box2D,
    pub envelope_width: i64,
    pub process: usize,
}




// ============================================================================
impl BlockParameters {

    pub fn new(bulk: Box2D, envelope_width: i64, process: usize) -> Self {
        Self {
            bulk,
            envelope: bulk.enlarge(envelope_width),
            envelope_width,
            process,
        }
    }

    /**
     * Convert a global index to this block's local frame (relative to the
     * lower corner of the envelope box).
     */
    pub fn to_local(&self, index: (i64, i64)) -> (i64, i64) {
        (index.0 - self.envelope.x0(), index.1 - self.envelope.y0())
    }

    /**
     * Convert a block-local index back to the global frame.
     */
    pub fn to_global(&self, index: (i64, i64)) -> (i64, i64) {
        (index.0 + self.envelope.x0(), index.1 + self.envelope.y0())
    }
}




/**
 * A declared ghost-copy relationship: cells in `from_box` of the source
 * block must be copied into `to_box` of the destination block. Both boxes
 * are in global coordinates; for ordinary overlaps they coincide, and for
 * periodic overlaps they differ by a whole-domain shift.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub from_block: usize,
    pub to_block: usize,
    pub from_box: Box2D,
    pub to_box: Box2D,
}




/**
 * An overlap which is only active when the owning grid declares periodicity
 * along the direction of its wraparound tag. The tag components are in
 * {-1, 0, 1}; diagonal tags serve the corner ghost cells when both axes
 * are periodic.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicOverlap {
    pub overlap: Overlap,
    pub direction: (i64, i64),
}




// ============================================================================
impl PeriodicOverlap {

    /**
     * Determine whether this overlap participates in envelope duplication
     * under the given per-axis periodicity flags.
     */
    pub fn is_active(&self, periodicity: (bool, bool)) -> bool {
        (self.direction.0 == 0 || periodicity.0) &&
        (self.direction.1 == 0 || periodicity.1)
    }
}




/**
 * The partition table for one global domain: every block's geometry, plus
 * the complete list of ordinary and periodic overlaps between blocks. The
 * table is immutable after construction and is shared read-only by every
 * grid built on top of the same partitioning.
 */
#[derive(Clone, Debug)]
pub struct BlockDistribution {
    domain: Box2D,
    envelope_width: i64,
    parameters: Vec<BlockParameters>,
    overlaps: Vec<Overlap>,
    periodic_overlaps: Vec<PeriodicOverlap>,
}




// ============================================================================
impl BlockDistribution {


    /**
     * Build a distribution from a list of bulk boxes, an envelope width,
     * and a block-to-process assignment. The bulks must tile the domain
     * exactly: any pair of overlapping interiors, any interior reaching
     * outside the domain, or any uncovered cell indicates a setup bug
     * upstream and aborts immediately.
     */
    pub fn new(domain: Box2D, bulks: Vec<Box2D>, envelope_width: i64, processes: Vec<usize>) -> Self {

        assert!(
            bulks.len() == processes.len(),
            "{} blocks but {} process assignments", bulks.len(), processes.len());
        assert!(envelope_width >= 0, "envelope width must be non-negative");

        let mut covered = 0;

        for (i, a) in bulks.iter().enumerate() {
            assert!(
                domain.contains_box(a),
                "block {} interior {:?} reaches outside the domain {:?}", i, a, domain);
            covered += a.num_cells();

            for (j, b) in bulks.iter().enumerate().skip(i + 1) {
                assert!(
                    Box2D::intersection(a, b).is_none(),
                    "block interiors {} and {} overlap: {:?} {:?}", i, j, a, b);
            }
        }
        assert!(
            covered == domain.num_cells(),
            "block interiors cover {} of {} domain cells", covered, domain.num_cells());

        let parameters: Vec<_> = bulks
            .iter()
            .zip(&processes)
            .map(|(&bulk, &process)| BlockParameters::new(bulk, envelope_width, process))
            .collect();

        let overlaps = Self::compute_overlaps(&parameters);
        let periodic_overlaps = Self::compute_periodic_overlaps(&domain, &parameters);

        Self {
            domain,
            envelope_width,
            parameters,
            overlaps,
            periodic_overlaps,
        }
    }


    /**
     * Build a distribution by splitting the domain into a near-uniform grid
     * of `num_x` by `num_y` blocks, assigned round-robin over `num_processes`
     * ranks.
     */
    pub fn regular(domain: Box2D, num_x: i64, num_y: i64, envelope_width: i64, num_processes: usize) -> Self {

        assert!(num_x > 0 && num_y > 0);
        assert!(num_processes > 0);

        let mut bulks = Vec::new();
        let mut processes = Vec::new();

        for i in 0..num_x {
            for j in 0..num_y {
                let x0 = domain.x0() + i * domain.nx() / num_x;
                let x1 = domain.x0() + (i + 1) * domain.nx() / num_x - 1;
                let y0 = domain.y0() + j * domain.ny() / num_y;
                let y1 = domain.y0() + (j + 1) * domain.ny() / num_y - 1;
                processes.push(bulks.len() % num_processes);
                bulks.push(Box2D::new(x0, x1, y0, y1));
            }
        }
        Self::new(domain, bulks, envelope_width, processes)
    }


    fn compute_overlaps(parameters: &[BlockParameters]) -> Vec<Overlap> {
        let mut overlaps = Vec::new();

        for (i, to) in parameters.iter().enumerate() {
            for (j, from) in parameters.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Some(region) = Box2D::intersection(&to.envelope, &from.bulk) {
                    overlaps.push(Overlap {
                        from_block: j,
                        to_block: i,
                        from_box: region,
                        to_box: region,
                    })
                }
            }
        }
        overlaps
    }


    fn compute_periodic_overlaps(domain: &Box2D, parameters: &[BlockParameters]) -> Vec<PeriodicOverlap> {
        let mut overlaps = Vec::new();

        for &direction in &[
            (-1, -1), (-1, 0), (-1, 1),
            ( 0, -1),          ( 0, 1),
            ( 1, -1), ( 1, 0), ( 1, 1),
        ] {
            let (dx, dy): (i64, i64) = direction;
            let shift = (dx * domain.nx(), dy * domain.ny());

            for (i, to) in parameters.iter().enumerate() {
                for (j, from) in parameters.iter().enumerate() {
                    let image = from.bulk.shift(shift.0, shift.1);

                    if let Some(region) = Box2D::intersection(&to.envelope, &image) {
                        overlaps.push(PeriodicOverlap {
                            overlap: Overlap {
                                from_block: j,
                                to_block: i,
                                from_box: region.shift(-shift.0, -shift.1),
                                to_box: region,
                            },
                            direction,
                        })
                    }
                }
            }
        }
        overlaps
    }


    pub fn domain(&self) -> Box2D {
        self.domain
    }


    pub fn envelope_width(&self) -> i64 {
        self.envelope_width
    }


    pub fn num_blocks(&self) -> usize {
        self.parameters.len()
    }


    pub fn parameters(&self, block: usize) -> &BlockParameters {
        &self.parameters[block]
    }


    pub fn overlaps(&self) -> &[Overlap] {
        &self.overlaps
    }


    pub fn periodic_overlaps(&self) -> &[PeriodicOverlap] {
        &self.periodic_overlaps
    }


    /**
     * Iterate the ids of the blocks whose home process is the given rank.
     */
    pub fn blocks_on_process(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.parameters
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.process == rank)
            .map(|(id, _)| id)
    }
}
