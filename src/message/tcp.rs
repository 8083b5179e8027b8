use std::collections::HashMap;
use std::io;
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use super::{backoff::ExponentialBackoff, comm::Communicator, util};


const STREAM_READ_TIMEOUT: Duration = Duration::from_millis(250);
const STREAM_WRITE_TIMEOUT: Duration = Duration::from_millis(250);
const CONNECT_INITIAL_WAIT: Duration = Duration::from_millis(250);
const CONNECT_MAX_WAIT: Duration = Duration::from_millis(5000);


type SendSink = crossbeam_channel::Sender<(usize, Vec<u8>)>;
type RecvSink = crossbeam_channel::Sender<Vec<u8>>;
type RecvSource = crossbeam_channel::Receiver<Vec<u8>>;




/**
 * The I/O side of a TCP process group: one listener thread accepting peer
 * connections (each absorbed by its own reader thread into a shared
 * receive channel), and one serial sender thread draining an outgoing
 * channel into per-peer connections. Frames are length-prefixed and each
 * one is acknowledged with the byte count the receiver absorbed, so a
 * broken connection is detected at the frame where it broke and the frame
 * is resent on a fresh connection.
 */
pub struct TcpHost {
    listen_thread: Option<thread::JoinHandle<()>>,
    send_thread: Option<thread::JoinHandle<()>>,
}




// ============================================================================
impl TcpHost {


    /**
     * Start the listener and sender threads for `rank` within the peer
     * table. Returns the host plus the three channel endpoints a
     * `TcpCommunicator` is built from.
     */
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> (Self, SendSink, RecvSink, RecvSource) {
        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers.clone(), send_src);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        let listen_thread = Self::start_listener(peers[rank], recv_sink.clone());

        (
            TcpHost {
                send_thread: Some(send_thread),
                listen_thread: Some(listen_thread),
            },
            send_sink,
            recv_sink,
            recv_src,
        )
    }


    /**
     * Wait for the sender thread to drain; it exits when the last send
     * sink is dropped. The listener thread runs for the process lifetime.
     */
    pub fn join(&mut self) {
        if let Some(thread) = self.send_thread.take() {
            thread.join().unwrap()
        }
    }


    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        send_src: crossbeam_channel::Receiver<(usize, Vec<u8>)>) -> thread::JoinHandle<()>
    {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();

            for (rank, message) in send_src {
                loop {
                    if !table.contains_key(&rank) {
                        table.insert(rank, Self::connect_with_retry(peers[rank]));
                    }
                    let stream = table.get_mut(&rank).unwrap();

                    match Self::send_frame(stream, &message) {
                        Ok(()) => break,
                        Err(e) => {
                            error!("send to {} failed, reconnecting: {}", peers[rank], e);
                            table.remove(&rank);
                        }
                    }
                }
            }
        })
    }


    /**
     * Write one length-prefixed frame and wait for its acknowledgment.
     */
    fn send_frame(stream: &mut TcpStream, message: &[u8]) -> io::Result<()> {
        stream.write_all(&(message.len() as u64).to_le_bytes())?;
        stream.write_all(message)?;

        let ack = util::read_frame_size(stream)?;
        if ack != message.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but peer acknowledged {}", message.len(), ack)));
        }
        Ok(())
    }


    fn start_listener(addr: SocketAddr, recv_sink: RecvSink) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            info!("listening on {}", addr);
            let listener = TcpListener::bind(addr).unwrap();
            loop {
                match listener.accept() {
                    Ok((stream, remote)) => {
                        Self::start_connection_reader(stream, remote, recv_sink.clone());
                    }
                    Err(e) => warn!("accept on {} failed: {}", addr, e),
                }
            }
        })
    }


    fn start_connection_reader(
        mut stream: TcpStream,
        remote: SocketAddr,
        recv_sink: RecvSink) -> thread::JoinHandle<()>
    {
        info!("accepted connection from {}", remote);
        stream.set_read_timeout(Some(STREAM_READ_TIMEOUT)).unwrap();
        stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT)).unwrap();

        thread::spawn(move || loop {
            let result = util::read_frame_size(&mut stream)
                .and_then(|size| util::read_frame_body(&mut stream, size))
                .and_then(|bytes| {
                    let count = bytes.len();
                    recv_sink
                        .send(bytes)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                    stream.write_all(&(count as u64).to_le_bytes())
                });

            if let Err(e) = result {
                // the peer reconnects and resends the broken frame
                info!("connection from {} closed: {}", remote, e);
                return;
            }
        })
    }


    fn connect_with_retry(addr: SocketAddr) -> TcpStream {
        let mut backoff = ExponentialBackoff::new(CONNECT_INITIAL_WAIT, CONNECT_MAX_WAIT, 2);

        loop {
            match TcpStream::connect(&addr) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(STREAM_READ_TIMEOUT)).unwrap();
                    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT)).unwrap();
                    return stream;
                }
                Err(e) => {
                    let wait = backoff.next().unwrap();
                    warn!("connect to {} failed ({}), retrying in {:?}", addr, e, wait);
                    thread::sleep(wait);
                }
            }
        }
    }
}




/**
 * The `Communicator` face of a `TcpHost`: sends go through the serial
 * sender's channel and receives drain the shared receive channel, so the
 * communicator itself holds no sockets and is cheap to clone per grid.
 * Dropping the last clone hangs up the sender thread.
 */
#[derive(Clone)]
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    send_sink: SendSink,
    recv_sink: RecvSink,
    recv_src: RecvSource,
}




// ============================================================================
impl TcpCommunicator {

    pub fn new(
        rank: usize,
        peers: &[SocketAddr],
        send_sink: SendSink,
        recv_sink: RecvSink,
        recv_src: RecvSource) -> Self
    {
        Self {
            rank,
            num_peers: peers.len(),
            send_sink,
            recv_sink,
            recv_src,
        }
    }
}

impl Communicator for TcpCommunicator {

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) {
        self.send_sink.send((rank, message)).unwrap()
    }

    fn recv(&self) -> Vec<u8> {
        self.recv_src.recv().unwrap()
    }

    fn requeue_recv(&self, bytes: Vec<u8>) {
        self.recv_sink.send(bytes).unwrap()
    }
}
