use std::io;
use std::io::prelude::*;




/**
 * Log-base-two of the next power of two: 8 -> 3, 9 -> 4.
 */
pub fn ceil_log2(x: usize) -> usize {
    let mut n = 0;
    while 1 << n < x {
        n += 1
    }
    n
}


/**
 * Read a little-endian u64 frame header out of the given stream.
 */
pub fn read_frame_size<R: Read>(stream: &mut R) -> io::Result<usize> {
    let mut buffer = [0; 8];
    read_bytes_into(stream, &mut buffer)?;
    Ok(u64::from_le_bytes(buffer) as usize)
}


/**
 * Read exactly `size` bytes from a stream into a vec.
 */
pub fn read_frame_body<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    read_bytes_into(stream, &mut buffer)?;
    Ok(buffer)
}


/**
 * Fill the given buffer by reading from a stream; short reads are resumed
 * at the cursor.
 */
pub fn read_bytes_into<R: Read>(stream: &mut R, buffer: &mut [u8]) -> io::Result<()> {
    let mut cursor = 0;
    while cursor < buffer.len() {
        let count = stream.read(&mut buffer[cursor..])?;
        if count == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed mid-frame"));
        }
        cursor += count;
    }
    Ok(())
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn ceil_log2_rounds_up() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn frames_round_trip_through_a_cursor() {
        let mut wire = Vec::new();
        let body = vec![1u8, 2, 3, 4, 5];
        wire.extend_from_slice(&(body.len() as u64).to_le_bytes());
        wire.extend_from_slice(&body);

        let mut cursor = std::io::Cursor::new(wire);
        let size = read_frame_size(&mut cursor).unwrap();
        assert_eq!(read_frame_body(&mut cursor, size).unwrap(), body);
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut cursor = std::io::Cursor::new(vec![1u8, 2]);
        assert!(read_frame_body(&mut cursor, 10).is_err());
    }
}
