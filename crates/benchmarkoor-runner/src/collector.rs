//! Block-log interception and test correlation
//!
//! The collector wraps the container's log stream as a write-through
//! interceptor: every byte is forwarded downstream before any state
//! mutation, then complete lines are offered to the client's parser.
//! Parsed payloads are correlated to tests by block hash, in whichever
//! order registration and log arrival happen.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use benchmarkoor_clients::BlockLogParser;

/// Bound on the unmatched buffer. Lines that never match indicate a
/// parser bug and must not leak; the oldest entry is evicted.
pub const MAX_UNMATCHED: usize = 1024;

struct Maps {
    /// block hash -> test name, registered before the log arrived.
    pending: HashMap<String, String>,
    /// test name -> payload, fully correlated.
    matched: BTreeMap<String, Value>,
    /// block hash -> payload, log arrived before registration.
    unmatched: HashMap<String, Value>,
    /// Insertion order of `unmatched`, for eviction.
    unmatched_order: VecDeque<String>,
}

struct State {
    parser: &'static dyn BlockLogParser,
    maps: Mutex<Maps>,
}

#[derive(Clone)]
pub struct BlockLogCollector {
    state: Arc<State>,
}

impl BlockLogCollector {
    pub fn new(parser: &'static dyn BlockLogParser) -> Self {
        Self {
            state: Arc::new(State {
                parser,
                maps: Mutex::new(Maps {
                    pending: HashMap::new(),
                    matched: BTreeMap::new(),
                    unmatched: HashMap::new(),
                    unmatched_order: VecDeque::new(),
                }),
            }),
        }
    }

    /// Early registration: the executor is about to submit the payload
    /// with this block hash for `test`. If the matching log already
    /// arrived, it is consumed immediately.
    pub fn register(&self, block_hash: &str, test: &str) {
        let mut maps = self.state.maps.lock();
        if let Some(payload) = maps.unmatched.remove(block_hash) {
            maps.unmatched_order.retain(|hash| hash != block_hash);
            maps.matched.insert(test.to_string(), payload);
            debug!(block_hash, test, "matched buffered block log");
        } else {
            maps.pending.insert(block_hash.to_string(), test.to_string());
        }
    }

    /// The payload correlated to `test`, if any log matched so far.
    pub fn matched_payload(&self, test: &str) -> Option<Value> {
        self.state.maps.lock().matched.get(test).cloned()
    }

    /// Drain all correlated payloads, keyed by test name.
    pub fn take_matched(&self) -> BTreeMap<String, Value> {
        std::mem::take(&mut self.state.maps.lock().matched)
    }

    #[cfg(test)]
    fn unmatched_len(&self) -> usize {
        self.state.maps.lock().unmatched.len()
    }

    /// A write-through interceptor feeding this collector. Multiple
    /// writers (stdout and stderr) may share one collector.
    pub fn writer(&self, downstream: Box<dyn Write + Send>) -> InterceptWriter {
        InterceptWriter {
            state: Arc::clone(&self.state),
            downstream,
            buffer: Mutex::new(Vec::new()),
        }
    }

    fn offer_line(state: &State, line: &str) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return;
        }
        let Some(parsed) = state.parser.parse_line(line) else {
            return;
        };

        let mut maps = state.maps.lock();
        if let Some(test) = maps.pending.remove(&parsed.block_hash) {
            debug!(block_hash = %parsed.block_hash, test = %test, "matched block log");
            maps.matched.insert(test, parsed.payload);
        } else {
            if maps.unmatched.len() >= MAX_UNMATCHED {
                if let Some(oldest) = maps.unmatched_order.pop_front() {
                    maps.unmatched.remove(&oldest);
                    warn!(block_hash = %oldest, "evicting oldest unmatched block log");
                }
            }
            maps.unmatched_order.push_back(parsed.block_hash.clone());
            maps.unmatched.insert(parsed.block_hash, parsed.payload);
        }
    }
}

/// Line-splitting writer that forwards everything downstream first.
pub struct InterceptWriter {
    state: Arc<State>,
    downstream: Box<dyn Write + Send>,
    buffer: Mutex<Vec<u8>>,
}

impl Write for InterceptWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // Forward unconditionally before touching collector state, so a
        // parser problem can never drop or truncate downstream output.
        self.downstream.write_all(buf)?;

        let mut buffer = self.buffer.lock();
        buffer.extend_from_slice(buf);
        while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            if let Ok(text) = std::str::from_utf8(&line[..line.len() - 1]) {
                BlockLogCollector::offer_line(&self.state, text);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.downstream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchmarkoor_clients::GethParser;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn block_log_line(hash: &str) -> String {
        format!(
            "INFO [08-01|12:00:00.000] {{\"block\":{{\"hash\":\"{hash}\",\"number\":1}},\"execution\":{{\"total_ns\":42}}}}\n"
        )
    }

    fn collector() -> BlockLogCollector {
        BlockLogCollector::new(&GethParser)
    }

    #[test]
    fn test_early_registration_then_log() {
        let collector = collector();
        collector.register("0xabc", "TestA");

        let mut writer = collector.writer(Box::new(SharedSink::default()));
        writer.write_all(block_log_line("0xabc").as_bytes()).expect("write");

        let payload = collector.matched_payload("TestA").expect("matched");
        assert_eq!(payload["block"]["hash"], "0xabc");
        assert_eq!(collector.unmatched_len(), 0);
    }

    #[test]
    fn test_late_log_then_registration_drains_buffer() {
        let collector = collector();
        let mut writer = collector.writer(Box::new(SharedSink::default()));
        writer.write_all(block_log_line("0xdef").as_bytes()).expect("write");

        assert!(collector.matched_payload("TestB").is_none());
        assert_eq!(collector.unmatched_len(), 1);

        collector.register("0xdef", "TestB");
        let payload = collector.matched_payload("TestB").expect("matched");
        assert_eq!(payload["block"]["hash"], "0xdef");
        assert_eq!(collector.unmatched_len(), 0);
    }

    #[test]
    fn test_both_orders_produce_the_same_match() {
        let early = collector();
        early.register("0x1", "T");
        early
            .writer(Box::new(SharedSink::default()))
            .write_all(block_log_line("0x1").as_bytes())
            .expect("write");

        let late = collector();
        late.writer(Box::new(SharedSink::default()))
            .write_all(block_log_line("0x1").as_bytes())
            .expect("write");
        late.register("0x1", "T");

        assert_eq!(early.matched_payload("T"), late.matched_payload("T"));
    }

    #[test]
    fn test_every_byte_forwards_downstream() {
        let sink = SharedSink::default();
        let collector = collector();
        let mut writer = collector.writer(Box::new(sink.clone()));

        let chunks: [&[u8]; 4] = [
            b"plain text line\n",
            b"INFO [08-01|12:00:00.000] {\"block\":{\"ha",
            b"sh\":\"0xsplit\"}}\npartial tail",
            b" continues",
        ];
        let mut expected = Vec::new();
        for chunk in chunks {
            writer.write_all(chunk).expect("write");
            expected.extend_from_slice(chunk);
        }

        assert_eq!(sink.contents(), expected);
        // The split line still parsed once complete.
        assert_eq!(collector.unmatched_len(), 1);
    }

    #[test]
    fn test_unmatched_buffer_is_bounded() {
        let collector = collector();
        let mut writer = collector.writer(Box::new(SharedSink::default()));
        for i in 0..(MAX_UNMATCHED + 10) {
            writer
                .write_all(block_log_line(&format!("0x{i:x}")).as_bytes())
                .expect("write");
        }
        assert_eq!(collector.unmatched_len(), MAX_UNMATCHED);

        // The oldest entries were evicted; a late registration for a
        // survivor still matches.
        collector.register("0x20", "TestSurvivor");
        assert!(collector.matched_payload("TestSurvivor").is_some());
        collector.register("0x1", "TestEvicted");
        assert!(collector.matched_payload("TestEvicted").is_none());
    }

    #[test]
    fn test_take_matched_drains() {
        let collector = collector();
        collector.register("0xabc", "TestA");
        collector
            .writer(Box::new(SharedSink::default()))
            .write_all(block_log_line("0xabc").as_bytes())
            .expect("write");

        let matched = collector.take_matched();
        assert_eq!(matched.len(), 1);
        assert!(collector.take_matched().is_empty());
    }
}
