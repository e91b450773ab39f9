//! Guarded 8-byte frames carrying the control numbers of the steady-state protocol:
//!  message lengths, acknowledgments, reply ports. The guard bytes let a receiver tell
//!  framing corruption apart from a short read.

use anyhow::bail;

use super::two_way_stream::TwoWayStream;

pub const FRAME_LEN: usize = 8;

const PREFIX: [u8; 2] = *b"PN";
const SUFFIX: [u8; 2] = *b"ET";

pub fn frame_int(x: i32) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..2].copy_from_slice(&PREFIX);
    frame[2..6].copy_from_slice(&x.to_le_bytes());
    frame[6..].copy_from_slice(&SUFFIX);
    frame
}

pub fn unframe_int(frame: &[u8; FRAME_LEN]) -> anyhow::Result<i32> {
    if frame[..2] != PREFIX || frame[6..] != SUFFIX {
        bail!("framing corrupted: {:?}", frame);
    }
    Ok(i32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]]))
}

pub async fn write_framed_int<S: TwoWayStream + ?Sized>(stream: &mut S, x: i32) -> anyhow::Result<()> {
    stream.write_all(&frame_int(x)).await
}

pub async fn read_framed_int<S: TwoWayStream + ?Sized>(stream: &mut S) -> anyhow::Result<i32> {
    let mut frame = [0u8; FRAME_LEN];
    stream.read_exact(&mut frame).await?;
    unframe_int(&frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(-1)]
    #[case(i32::MAX)]
    #[case(i32::MIN)]
    fn test_roundtrip(#[case] x: i32) {
        assert_eq!(unframe_int(&frame_int(x)).unwrap(), x);
    }

    #[test]
    fn test_corrupted_guard_rejected() {
        let mut frame = frame_int(42);
        frame[0] = b'X';
        assert!(unframe_int(&frame).is_err());
        let mut frame = frame_int(42);
        frame[7] = 0;
        assert!(unframe_int(&frame).is_err());
    }

    #[tokio::test]
    async fn test_read_framed_int_from_stream() {
        use crate::net::two_way_stream::MockTwoWayStream;

        let mut stream = MockTwoWayStream::new();
        stream.expect_read_exact().returning(|buf| {
            buf.copy_from_slice(&frame_int(-77));
            Ok(())
        });
        assert_eq!(read_framed_int(&mut stream).await.unwrap(), -77);
    }
}
