use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::block::AtomicBlock;
use crate::distribution::{BlockDistribution, Overlap};
use crate::message::comm::Communicator;
use crate::statistics::{self, BlockStatistics};




/**
 * Makes every block's envelope consistent with its neighbors' interiors by
 * copying along every overlap and every currently active periodic overlap
 * of a distribution. The single-process implementation copies in memory;
 * the message-passing one moves cross-process overlaps through a
 * transport. Overlaps never write intersecting destination regions of the
 * same block (a partition invariant), so they may be applied in any order.
 */
pub trait BlockCommunicator: Send {
    /**
     * Copy every overlap's source region into the destination's ghost
     * region. `grid` identifies the owning grid, so ghost traffic of
     * different grids sharing one transport cannot be confused.
     */
    fn duplicate_overlaps(
        &self,
        grid: usize,
        blocks: &mut Vec<Option<AtomicBlock>>,
        distribution: &BlockDistribution,
        periodicity: (bool, bool));

    /**
     * Notification that the set of active periodic overlaps may have
     * changed.
     */
    fn signal_periodicity(&self) {}

    /**
     * Merge a locally combined statistics accumulator with its
     * counterparts on the other processes. The single-process
     * implementation returns its argument unchanged.
     */
    fn combine_statistics(&self, local: BlockStatistics) -> BlockStatistics {
        local
    }
}




/**
 * Apply one overlap between two locally resident blocks. The destination
 * block is lifted out of its slot for the duration of the copy, which
 * keeps source and destination borrows disjoint; overlaps of a block onto
 * itself (periodic wraparound on a single block) use the self-copy path.
 */
fn copy_overlap(blocks: &mut Vec<Option<AtomicBlock>>, overlap: &Overlap) {
    let offset = (
        overlap.from_box.x0() - overlap.to_box.x0(),
        overlap.from_box.y0() - overlap.to_box.y0());

    if overlap.from_block == overlap.to_block {
        let block = blocks[overlap.to_block]
            .as_mut()
            .expect("overlap destination block is not resident");
        block.attribute_self(&overlap.to_box, offset);
    } else {
        let mut to = blocks[overlap.to_block]
            .take()
            .expect("overlap destination block is not resident");
        {
            let from = blocks[overlap.from_block]
                .as_ref()
                .expect("overlap source block is not resident");
            to.attribute(&overlap.to_box, offset, from);
        }
        blocks[overlap.to_block] = Some(to);
    }
}


/**
 * The overlaps participating in one duplication round: every ordinary
 * overlap plus the periodic overlaps whose direction is enabled. Indexes
 * are (periodic flag, position in the distribution's list), which is
 * identical on every process.
 */
fn active_overlaps<'a>(
    distribution: &'a BlockDistribution,
    periodicity: (bool, bool)) -> impl Iterator<Item = (bool, usize, &'a Overlap)>
{
    let ordinary = distribution
        .overlaps()
        .iter()
        .enumerate()
        .map(|(index, overlap)| (false, index, overlap));

    let periodic = distribution
        .periodic_overlaps()
        .iter()
        .enumerate()
        .filter(move |(_, p)| p.is_active(periodicity))
        .map(|(index, p)| (true, index, &p.overlap));

    ordinary.chain(periodic)
}




/**
 * Single-process communicator: every block is locally resident and every
 * overlap is a plain in-memory copy.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectCommunicator;

impl BlockCommunicator for DirectCommunicator {
    fn duplicate_overlaps(
        &self,
        _grid: usize,
        blocks: &mut Vec<Option<AtomicBlock>>,
        distribution: &BlockDistribution,
        periodicity: (bool, bool))
    {
        for (_, _, overlap) in active_overlaps(distribution, periodicity) {
            copy_overlap(blocks, overlap);
        }
    }
}




/**
 * One ghost-region payload in flight between two processes.
 */
#[derive(Serialize, Deserialize)]
struct GhostMessage {
    grid: usize,
    periodic: bool,
    index: usize,
    data: Vec<f64>,
}




/**
 * Message-passing communicator: blocks may live on different processes.
 * Same-process overlaps degenerate to the direct path; for the rest, the
 * source sub-box is serialized and sent to the destination's owner, which
 * injects it into the ghost region. The transport handle is passed in at
 * construction and threaded through every exchange. Transport failure is
 * fatal.
 */
pub struct ParallelCommunicator<C: Communicator> {
    rank: usize,
    comm: C,
}




// ============================================================================
impl<C: Communicator> ParallelCommunicator<C> {

    pub fn new(comm: C) -> Self {
        Self {
            rank: comm.rank(),
            comm,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
}

impl<C: Communicator + Send> BlockCommunicator for ParallelCommunicator<C> {

    fn duplicate_overlaps(
        &self,
        grid: usize,
        blocks: &mut Vec<Option<AtomicBlock>>,
        distribution: &BlockDistribution,
        periodicity: (bool, bool))
    {
        let mut expected = 0;

        // Outgoing and same-process copies first; sends do not block.
        for (periodic, index, overlap) in active_overlaps(distribution, periodicity) {
            let from_rank = distribution.parameters(overlap.from_block).process;
            let to_rank = distribution.parameters(overlap.to_block).process;

            if from_rank == self.rank && to_rank == self.rank {
                copy_overlap(blocks, overlap);
            } else if from_rank == self.rank {
                let from = blocks[overlap.from_block]
                    .as_ref()
                    .expect("overlap source block is not resident on its home process");
                let message = GhostMessage {
                    grid,
                    periodic,
                    index,
                    data: from.extract(&overlap.from_box),
                };
                trace!("send ghost region {:?} to rank {}", overlap.from_box, to_rank);
                self.comm.send(to_rank, rmp_serde::encode::to_vec(&message).unwrap());
            } else if to_rank == self.rank {
                expected += 1;
            }
        }
        debug!("rank {} expects {} ghost regions for grid {}", self.rank, expected, grid);

        // Then absorb incoming ghost regions until every expected overlap
        // has arrived. Frames belonging to another grid's round go back on
        // the queue.
        while expected > 0 {
            let bytes = self.comm.recv();
            let message: GhostMessage = rmp_serde::decode::from_slice(&bytes).unwrap();

            if message.grid != grid {
                self.comm.requeue_recv(bytes);
                continue;
            }
            let overlap = if message.periodic {
                &distribution.periodic_overlaps()[message.index].overlap
            } else {
                &distribution.overlaps()[message.index]
            };
            let to = blocks[overlap.to_block]
                .as_mut()
                .expect("received a ghost region for a non-resident block");
            to.inject(&overlap.to_box, &message.data);
            expected -= 1;
        }
    }

    fn combine_statistics(&self, local: BlockStatistics) -> BlockStatistics {
        statistics::combine_across(&self.comm, &local)
    }
}
