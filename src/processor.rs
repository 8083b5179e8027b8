use std::sync::Arc;

use crate::block::AtomicBlock;
use crate::geometry::Box2D;
use crate::statistics::BlockStatistics;




/**
 * Where an operation applies relative to each block: interior cells only,
 * interior plus the ghost ring, or the ghost ring alone.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applicability {
    Bulk,
    BulkAndEnvelope,
    EnvelopeOnly,
}




// ============================================================================
impl Applicability {

    pub fn includes_envelope(&self) -> bool {
        match self {
            Applicability::Bulk => false,
            Applicability::BulkAndEnvelope => true,
            Applicability::EnvelopeOnly => true,
        }
    }
}




/**
 * Per-participant read/write declaration. The dispatch engine trusts this
 * declaration: written participants get their envelopes refreshed, and
 * read-only participants may have duplicate candidate regions trimmed.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modification {
    Nothing,
    Variables,
}




/**
 * The callback interface consumed from the physics layer. An operation is
 * handed the sub-box it must cover (in global coordinates) and one atomic
 * block per participant, in participant order. Blocks expose their own
 * global bounding boxes, so an operation recovers the offset between
 * coupled participants directly from the views it is given. The engine
 * never inspects what the callback does with cell data; it only honors
 * the declared domain, applicability, and modification pattern.
 */
pub trait GridOperation: Send + Sync {
    fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]);

    /// One entry per participant, in participant order.
    fn modification_pattern(&self) -> Vec<Modification>;

    fn clone_box(&self) -> Box<dyn GridOperation>;
}

impl Clone for Box<dyn GridOperation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}




/**
 * A callback which additionally folds per-cell contributions into a
 * statistics accumulator. The engine creates one private accumulator per
 * dispatched operation instance (`subscribe` defines the slots) and merges
 * them after the pass.
 */
pub trait ReductiveGridOperation: Send + Sync {
    fn subscribe(&self, statistics: &mut BlockStatistics);

    fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock], statistics: &mut BlockStatistics);

    fn modification_pattern(&self) -> Vec<Modification>;
}




/**
 * An operation staged on an atomic block's internal queue. `partners`
 * names the other participating blocks as (participant index, block id)
 * pairs relative to the participant list the operation was staged with;
 * it is empty for operations coupling nothing beyond their host block.
 */
pub struct StagedProcessor {
    pub domain: Box2D,
    pub op: Box<dyn GridOperation>,
    pub partners: Vec<(usize, usize)>,
}




/**
 * A value-like descriptor of one grid operation: the target sub-box, the
 * applicability mode, and the operation itself. Specs are cloned, shifted
 * (to re-express an operation for a periodic image) and extracted onto
 * sub-boxes by the dispatch engine; an empty extraction means the spec is
 * simply discarded.
 */
pub struct ProcessorSpec {
    pub domain: Box2D,
    pub applicability: Applicability,
    pub op: Box<dyn GridOperation>,
}




// ============================================================================
impl ProcessorSpec {


    pub fn new(domain: Box2D, applicability: Applicability, op: Box<dyn GridOperation>) -> Self {
        Self { domain, applicability, op }
    }


    /**
     * Translate the target box.
     */
    pub fn shift(&self, dx: i64, dy: i64) -> Self {
        Self {
            domain: self.domain.shift(dx, dy),
            applicability: self.applicability,
            op: self.op.clone(),
        }
    }


    /**
     * Intersect the target with the given box, or `None` if the
     * intersection is empty.
     */
    pub fn extract(&self, region: &Box2D) -> Option<Self> {
        Box2D::intersection(&self.domain, region).map(|domain| Self {
            domain,
            applicability: self.applicability,
            op: self.op.clone(),
        })
    }
}

impl Clone for ProcessorSpec {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain,
            applicability: self.applicability,
            op: self.op.clone(),
        }
    }
}




/**
 * The reductive counterpart of a ProcessorSpec. Reductive operations
 * gather statistics cell-by-cell, so their dispatch is clipped to block
 * interiors (ghost cells never contribute to a statistic). After
 * execution, `statistics` holds the merged global result.
 */
pub struct ReductiveProcessorSpec {
    pub domain: Box2D,
    pub op: Box<dyn ReductiveGridOperation>,
    statistics: BlockStatistics,
}




// ============================================================================
impl ReductiveProcessorSpec {

    pub fn new(domain: Box2D, op: Box<dyn ReductiveGridOperation>) -> Self {
        Self {
            domain,
            op,
            statistics: BlockStatistics::new(),
        }
    }

    /**
     * The combined result of the last execution. Slot indexes follow the
     * subscription order defined by the operation's `subscribe`.
     */
    pub fn statistics(&self) -> &BlockStatistics {
        &self.statistics
    }

    pub(crate) fn set_statistics(&mut self, statistics: BlockStatistics) {
        self.statistics = statistics;
    }
}




/**
 * The four true domain edges of a 2D box.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
    Bottom,
    Top,
}




/**
 * The four domain corners.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Corner {
    BottomLeft,
    BottomRight,
    TopLeft,
    TopRight,
}




/**
 * An operation which uses a different stencil near the true boundary of
 * its domain than in the interior: one callback for the bulk, one per
 * edge plane, one per corner. Needed whenever the interior stencil wants
 * neighbor cells which do not exist at a real domain edge.
 */
pub trait BoundedGridOperation: Send + Sync {
    fn process_bulk(&self, domain: Box2D, blocks: &mut [AtomicBlock]);

    fn process_edge(&self, edge: Edge, domain: Box2D, blocks: &mut [AtomicBlock]);

    fn process_corner(&self, corner: Corner, domain: Box2D, blocks: &mut [AtomicBlock]);

    fn modification_pattern(&self) -> Vec<Modification>;
}




#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BoundaryRegion {
    Bulk,
    Edge(Edge),
    Corner(Corner),
}




/**
 * Adapter binding one boundary region of a bounded operation to the plain
 * operation interface, so each region dispatches like any other spec.
 */
struct BoundedRegionOp {
    region: BoundaryRegion,
    op: Arc<dyn BoundedGridOperation>,
}

impl GridOperation for BoundedRegionOp {
    fn process(&self, domain: Box2D, blocks: &mut [AtomicBlock]) {
        match self.region {
            BoundaryRegion::Bulk => self.op.process_bulk(domain, blocks),
            BoundaryRegion::Edge(edge) => self.op.process_edge(edge, domain, blocks),
            BoundaryRegion::Corner(corner) => self.op.process_corner(corner, domain, blocks),
        }
    }

    fn modification_pattern(&self) -> Vec<Modification> {
        self.op.modification_pattern()
    }

    fn clone_box(&self) -> Box<dyn GridOperation> {
        Box::new(Self {
            region: self.region,
            op: self.op.clone(),
        })
    }
}




/**
 * Classify the boundary of `domain` into one bulk box, four edge planes
 * of the given width, and four width-by-width corners, and return one
 * ProcessorSpec per region. The nine regions tile the domain exactly.
 */
pub fn bounded_processor_specs(
    op: Arc<dyn BoundedGridOperation>,
    domain: Box2D,
    width: i64) -> Vec<ProcessorSpec>
{
    assert!(
        width > 0 && domain.nx() > 2 * width && domain.ny() > 2 * width,
        "domain {:?} too small for boundary width {}", domain, width);

    let (x0, x1, y0, y1) = (domain.x0(), domain.x1(), domain.y0(), domain.y1());
    let (ix0, ix1) = (x0 + width, x1 - width);
    let (iy0, iy1) = (y0 + width, y1 - width);

    let regions = vec![
        (BoundaryRegion::Bulk, Box2D::new(ix0, ix1, iy0, iy1)),
        (BoundaryRegion::Edge(Edge::Left), Box2D::new(x0, ix0 - 1, iy0, iy1)),
        (BoundaryRegion::Edge(Edge::Right), Box2D::new(ix1 + 1, x1, iy0, iy1)),
        (BoundaryRegion::Edge(Edge::Bottom), Box2D::new(ix0, ix1, y0, iy0 - 1)),
        (BoundaryRegion::Edge(Edge::Top), Box2D::new(ix0, ix1, iy1 + 1, y1)),
        (BoundaryRegion::Corner(Corner::BottomLeft), Box2D::new(x0, ix0 - 1, y0, iy0 - 1)),
        (BoundaryRegion::Corner(Corner::BottomRight), Box2D::new(ix1 + 1, x1, y0, iy0 - 1)),
        (BoundaryRegion::Corner(Corner::TopLeft), Box2D::new(x0, ix0 - 1, iy1 + 1, y1)),
        (BoundaryRegion::Corner(Corner::TopRight), Box2D::new(ix1 + 1, x1, iy1 + 1, y1)),
    ];

    regions
        .into_iter()
        .map(|(region, sub)| ProcessorSpec::new(
            sub,
            Applicability::Bulk,
            Box::new(BoundedRegionOp { region, op: op.clone() })))
        .collect()
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::sync::Arc;
    use crate::block::AtomicBlock;
    use crate::geometry::{box2d, Box2D};
    use super::*;

    struct Nop;

    impl BoundedGridOperation for Nop {
        fn process_bulk(&self, _: Box2D, _: &mut [AtomicBlock]) {}
        fn process_edge(&self, _: Edge, _: Box2D, _: &mut [AtomicBlock]) {}
        fn process_corner(&self, _: Corner, _: Box2D, _: &mut [AtomicBlock]) {}
        fn modification_pattern(&self) -> Vec<Modification> {
            vec![Modification::Variables]
        }
    }

    #[test]
    fn bounded_regions_tile_the_domain() {
        let domain = box2d(0, 9, 0, 7);
        let specs = bounded_processor_specs(Arc::new(Nop), domain, 2);

        assert_eq!(specs.len(), 9);

        let covered: usize = specs.iter().map(|s| s.domain.num_cells()).sum();
        assert_eq!(covered, domain.num_cells());

        for (i, a) in specs.iter().enumerate() {
            assert!(domain.contains_box(&a.domain));
            for b in &specs[i + 1..] {
                assert_eq!(Box2D::intersection(&a.domain, &b.domain), None);
            }
        }
    }

    #[test]
    fn extract_drops_empty_intersections() {
        let spec = bounded_processor_specs(Arc::new(Nop), box2d(0, 9, 0, 9), 1).remove(0);
        assert!(spec.extract(&box2d(100, 110, 0, 9)).is_none());

        let clipped = spec.extract(&box2d(0, 3, 0, 9)).unwrap();
        assert!(spec.domain.contains_box(&clipped.domain));
    }
}
