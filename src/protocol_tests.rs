// Test suite for the wire protocol
// Covers framing in both directions, capacity enforcement and the small
// helpers the client and daemon share.

use crate::protocol::{
    COMMAND_CAPACITY, FrameError, SENTINEL, TRUNCATION_NOTICE, command_limit, error_payload,
    is_terminating, is_truncated, read_frame, strip_truncation, write_frame,
};
use futures::io::{BufReader, Cursor};

#[cfg(test)]
mod framing_tests {
    use super::*;

    #[async_std::test]
    async fn test_write_frame_appends_sentinel() {
        let mut out = Cursor::new(Vec::new());
        write_frame(&mut out, b"echo hello").await.unwrap();
        assert_eq!(out.into_inner(), b"echo hello\0".to_vec());
    }

    #[async_std::test]
    async fn test_write_empty_frame() {
        let mut out = Cursor::new(Vec::new());
        write_frame(&mut out, b"").await.unwrap();
        assert_eq!(out.into_inner(), vec![SENTINEL]);
    }

    #[async_std::test]
    async fn test_write_frame_rejects_embedded_sentinel() {
        let mut out = Cursor::new(Vec::new());
        let err = write_frame(&mut out, b"ab\0cd").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(out.into_inner().is_empty());
    }

    #[async_std::test]
    async fn test_read_consecutive_frames() {
        let mut reader = Cursor::new(b"ls\0pwd\0".to_vec());
        assert_eq!(read_frame(&mut reader, 199).await.unwrap(), Some(b"ls".to_vec()));
        assert_eq!(read_frame(&mut reader, 199).await.unwrap(), Some(b"pwd".to_vec()));
        assert_eq!(read_frame(&mut reader, 199).await.unwrap(), None);
    }

    /// Frames split across many small buffer fills must reassemble intact
    #[async_std::test]
    async fn test_read_frame_across_small_reads() {
        let mut reader = BufReader::with_capacity(3, Cursor::new(b"uname -a\0id\0".to_vec()));
        assert_eq!(
            read_frame(&mut reader, 199).await.unwrap(),
            Some(b"uname -a".to_vec())
        );
        assert_eq!(read_frame(&mut reader, 199).await.unwrap(), Some(b"id".to_vec()));
    }

    #[async_std::test]
    async fn test_read_empty_frame() {
        let mut reader = Cursor::new(vec![SENTINEL]);
        assert_eq!(read_frame(&mut reader, 10).await.unwrap(), Some(Vec::new()));
    }

    #[async_std::test]
    async fn test_read_frame_exactly_at_limit() {
        let mut data = vec![b'a'; 10];
        data.push(SENTINEL);
        let mut reader = Cursor::new(data);
        assert_eq!(read_frame(&mut reader, 10).await.unwrap(), Some(vec![b'a'; 10]));
    }

    /// An oversized frame is reported and skipped, the next one still parses
    #[async_std::test]
    async fn test_oversized_frame_resynchronises() {
        let mut data = vec![b'x'; 50];
        data.push(SENTINEL);
        data.extend_from_slice(b"date\0");
        let mut reader = BufReader::with_capacity(8, Cursor::new(data));

        match read_frame(&mut reader, 10).await {
            Err(FrameError::Oversized { limit }) => assert_eq!(limit, 10),
            other => panic!("Expected Oversized, got {:?}", other),
        }
        assert_eq!(read_frame(&mut reader, 10).await.unwrap(), Some(b"date".to_vec()));
    }

    #[async_std::test]
    async fn test_eof_mid_frame() {
        let mut reader = Cursor::new(b"partial".to_vec());
        match read_frame(&mut reader, 199).await {
            Err(FrameError::UnexpectedEof) => (),
            other => panic!("Expected UnexpectedEof, got {:?}", other),
        }
    }

    #[async_std::test]
    async fn test_eof_before_frame() {
        let mut reader = Cursor::new(Vec::new());
        assert!(read_frame(&mut reader, 199).await.unwrap().is_none());
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn test_terminating_commands_match_exactly() {
        assert!(is_terminating(b"quit"));
        assert!(is_terminating(b"exit"));
        assert!(!is_terminating(b"QUIT"));
        assert!(!is_terminating(b"quit "));
        assert!(!is_terminating(b"exit 0"));
        assert!(!is_terminating(b""));
    }

    #[test]
    fn test_command_limit_leaves_room_for_sentinel() {
        assert_eq!(command_limit(COMMAND_CAPACITY), 199);
        assert_eq!(command_limit(0), 0);
    }

    #[test]
    fn test_truncation_notice_detection() {
        let mut payload = b"lots of output".to_vec();
        assert!(!is_truncated(&payload));
        payload.extend_from_slice(TRUNCATION_NOTICE);
        assert!(is_truncated(&payload));
        assert_eq!(strip_truncation(&payload), b"lots of output");
        assert_eq!(strip_truncation(b"plain"), b"plain");
    }

    #[test]
    fn test_error_payload_has_prefix_and_no_sentinel() {
        let payload = error_payload("bad\0thing");
        assert_eq!(payload, b"error: badthing".to_vec());
    }
}
