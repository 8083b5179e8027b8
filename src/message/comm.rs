use super::util;




/**
 * Interface to a group of processes exchanging byte messages. The
 * transport underneath can be TCP, shared memory, or a higher level
 * substrate like MPI; implementors provide point-to-point `send` and
 * `recv`, and the trait derives tree-structured collectives on top.
 *
 * The collectives share the point-to-point receive queue, so every rank
 * must enter a collective at the same point of its message schedule; a
 * collective must not be interleaved with an unfinished point-to-point
 * exchange.
 */
pub trait Communicator {
    /// The rank of this process within the communicator.
    fn rank(&self) -> usize;

    /// The number of processes in the communicator.
    fn size(&self) -> usize;

    /// Send a message to a peer. Must return without waiting for a
    /// matching receive to be posted.
    fn send(&self, rank: usize, message: Vec<u8>);

    /// Receive a message from any peer, blocking until one is ready.
    fn recv(&self) -> Vec<u8>;

    /// Put a received message back on the receive queue, for consumers
    /// which pulled a frame addressed to a later round.
    fn requeue_recv(&self, bytes: Vec<u8>);

    /**
     * Binomial-tree broadcast from rank 0. The message must be `Some` on
     * the root and `None` everywhere else; every rank returns the root's
     * message.
     */
    fn broadcast(&self, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(),
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, value.clone())
            }
        }
        value
    }

    /**
     * Binomial-tree reduce over a commutative fold. Rank 0 returns the
     * folded value; every other rank returns `None`.
     */
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Option<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv())
                }
            } else {
                self.send(r - one, value);
                return None;
            }
        }
        Some(value)
    }

    /**
     * All-reduce (symmetric fold) over a commutative fold: reduce to rank
     * 0, then broadcast the result, so every rank returns the same value.
     */
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Vec<u8>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        self.broadcast(self.reduce(f, value))
    }
}
