//! End-to-end decoding scenarios driven through the public accumulator
//! API, including blocked decoding and late error delivery.

use std::cell::RefCell;
use std::rc::Rc;

use quill_qpack::{
    ConnectionErrorSink, Decoder, DecodedHeadersAccumulator, ErrorCode, HeaderList,
    QpackSettings, StreamSender, Visitor,
};

const TEST_STREAM_ID: u64 = 1;
const MAX_HEADER_LIST_SIZE: u64 = 100;
const MAX_DYNAMIC_TABLE_CAPACITY: u64 = 100;
const MAX_BLOCKED_STREAMS: u64 = 1;

fn hex(s: &str) -> Vec<u8> {
    assert!(s.len() % 2 == 0);
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

#[derive(Default)]
struct VisitorState {
    decoded: Option<HeaderList>,
    error: Option<String>,
    callbacks: usize,
}

struct RecordingVisitor(Rc<RefCell<VisitorState>>);

impl Visitor for RecordingVisitor {
    fn on_headers_decoded(&mut self, headers: HeaderList) {
        let mut state = self.0.borrow_mut();
        state.callbacks += 1;
        state.decoded = Some(headers);
    }

    fn on_header_decoding_error(&mut self, message: &str) {
        let mut state = self.0.borrow_mut();
        state.callbacks += 1;
        state.error = Some(message.to_string());
    }
}

struct PanicErrorSink;

impl ConnectionErrorSink for PanicErrorSink {
    fn fail(&mut self, code: ErrorCode, reason: &str) {
        panic!("unexpected connection error {code}: {reason}");
    }
}

struct CaptureStream(Rc<RefCell<Vec<u8>>>);

impl StreamSender for CaptureStream {
    fn write_stream_data(&mut self, data: &[u8]) {
        self.0.borrow_mut().extend_from_slice(data);
    }
}

struct Fixture {
    decoder: Decoder,
    accumulator: DecodedHeadersAccumulator,
    visitor: Rc<RefCell<VisitorState>>,
    decoder_stream: Rc<RefCell<Vec<u8>>>,
}

fn fixture() -> Fixture {
    let settings = QpackSettings {
        maximum_dynamic_table_capacity: MAX_DYNAMIC_TABLE_CAPACITY,
        maximum_blocked_streams: MAX_BLOCKED_STREAMS,
        ..QpackSettings::default()
    };
    let mut decoder = Decoder::new(settings, Box::new(PanicErrorSink));

    let decoder_stream = Rc::new(RefCell::new(Vec::new()));
    decoder.set_decoder_stream_sender(Rc::new(RefCell::new(CaptureStream(
        decoder_stream.clone(),
    ))));

    let visitor = Rc::new(RefCell::new(VisitorState::default()));
    let accumulator = decoder.create_progressive_decoder(
        TEST_STREAM_ID,
        Box::new(RecordingVisitor(visitor.clone())),
        MAX_HEADER_LIST_SIZE,
    );

    Fixture {
        decoder,
        accumulator,
        visitor,
        decoder_stream,
    }
}

fn field_pairs(headers: &HeaderList) -> Vec<(String, String)> {
    headers
        .fields()
        .iter()
        .map(|f| {
            (
                String::from_utf8_lossy(&f.name).into_owned(),
                String::from_utf8_lossy(&f.value).into_owned(),
            )
        })
        .collect()
}

#[test]
fn empty_payload() {
    let mut fx = fixture();
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    assert_eq!(state.error.as_deref(), Some("Incomplete header data prefix."));
    assert_eq!(state.callbacks, 1);
}

#[test]
fn truncated_header_block_prefix() {
    let mut fx = fixture();
    fx.accumulator.decode(&hex("00"));
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    assert_eq!(state.error.as_deref(), Some("Incomplete header data prefix."));
}

#[test]
fn empty_header_list() {
    let mut fx = fixture();
    let encoded = hex("0000");
    fx.accumulator.decode(&encoded);
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    let headers = state.decoded.as_ref().unwrap();
    assert!(headers.is_empty());
    assert_eq!(headers.uncompressed_header_bytes(), 0);
    assert_eq!(headers.compressed_header_bytes(), encoded.len() as u64);
}

#[test]
fn truncated_payload() {
    let mut fx = fixture();
    fx.accumulator.decode(&hex("00002366"));
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    assert_eq!(state.error.as_deref(), Some("Incomplete header block."));
}

#[test]
fn invalid_static_reference() {
    let mut fx = fixture();
    // Second indexed field line references static entry 99, one past the
    // end; the error fires during decode, before end_header_block.
    fx.accumulator.decode(&hex("0000ff23ff24"));

    let state = fx.visitor.borrow();
    assert_eq!(state.error.as_deref(), Some("Static table entry not found."));
    assert_eq!(state.callbacks, 1);
}

#[test]
fn literal_field_success() {
    let mut fx = fixture();
    let encoded = hex("000023666f6f03626172");
    fx.accumulator.decode(&encoded);
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    let headers = state.decoded.as_ref().unwrap();
    assert_eq!(
        field_pairs(headers),
        vec![("foo".to_string(), "bar".to_string())]
    );
    assert_eq!(headers.uncompressed_header_bytes(), 6);
    assert_eq!(headers.compressed_header_bytes(), encoded.len() as u64);
}

#[test]
fn exceeding_limit_delivers_empty_sentinel() {
    let mut fx = fixture();
    // "foobar" with a 125-byte value: 6 + 125 + 32 > 100.
    let mut encoded = hex("000026666f6f6261727d");
    encoded.extend(std::iter::repeat(b'a').take(125));
    fx.accumulator.decode(&encoded);
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    let headers = state.decoded.as_ref().unwrap();
    assert!(headers.is_empty());
    assert_eq!(headers.uncompressed_header_bytes(), 0);
    assert_eq!(headers.compressed_header_bytes(), 0);
}

#[test]
fn blocked_decoding_unblocks_and_acknowledges() {
    let mut fx = fixture();
    let encoded = hex("020080");
    fx.accumulator.decode(&encoded);
    fx.accumulator.end_header_block();
    assert!(fx.accumulator.is_blocked());
    assert!(fx.visitor.borrow().callbacks == 0);

    // Peer sets table capacity and inserts "foo: bar", unblocking the
    // stream.
    fx.decoder.on_encoder_stream_bytes(&hex("3f45"));
    fx.decoder
        .on_encoder_stream_bytes(b"\x43foo\x03bar");

    let state = fx.visitor.borrow();
    let headers = state.decoded.as_ref().unwrap();
    assert_eq!(
        field_pairs(headers),
        vec![("foo".to_string(), "bar".to_string())]
    );
    assert_eq!(headers.uncompressed_header_bytes(), 6);
    assert_eq!(headers.compressed_header_bytes(), encoded.len() as u64);

    // Section Acknowledgement for stream 1 went out on the decoder stream.
    assert_eq!(&fx.decoder_stream.borrow()[..], &[0x81]);
}

#[test]
fn blocked_decoding_unblocked_before_end_of_block() {
    let mut fx = fixture();
    fx.accumulator.decode(&hex("020080"));

    fx.decoder.on_encoder_stream_bytes(&hex("3f45"));
    fx.decoder.on_encoder_stream_bytes(b"\x43foo\x03bar");
    assert!(fx.visitor.borrow().callbacks == 0);

    // Rest of the block: the same entry again.
    fx.accumulator.decode(&hex("80"));
    fx.accumulator.end_header_block();

    let state = fx.visitor.borrow();
    let headers = state.decoded.as_ref().unwrap();
    assert_eq!(
        field_pairs(headers),
        vec![
            ("foo".to_string(), "bar".to_string()),
            ("foo".to_string(), "bar".to_string()),
        ]
    );
    assert_eq!(&fx.decoder_stream.borrow()[..], &[0x81]);
}

#[test]
fn unblocked_block_can_still_fail() {
    let mut fx = fixture();
    // Blocked on one pending insertion.
    fx.accumulator.decode(&hex("0200"));
    // Relative index 0: valid once unblocked.
    fx.accumulator.decode(&hex("80"));
    // Relative index 1 is at or past Base: invalid.
    fx.accumulator.decode(&hex("81"));
    assert!(fx.visitor.borrow().callbacks == 0);

    fx.decoder.on_encoder_stream_bytes(&hex("3f45"));
    fx.decoder.on_encoder_stream_bytes(b"\x43foo\x03bar");

    let state = fx.visitor.borrow();
    assert_eq!(state.error.as_deref(), Some("Invalid relative index."));
    assert_eq!(state.callbacks, 1);
    // No acknowledgement for a failed block.
    assert!(fx.decoder_stream.borrow().is_empty());
}

#[test]
fn blocked_stream_limit_enforced() {
    let mut fx = fixture();
    fx.accumulator.decode(&hex("0200"));
    assert!(fx.accumulator.is_blocked());
    assert_eq!(fx.decoder.blocked_stream_count(), 1);

    // A second stream blocking on the same insertion exceeds
    // maximum_blocked_streams = 1.
    let second_visitor = Rc::new(RefCell::new(VisitorState::default()));
    let mut second = fx.decoder.create_progressive_decoder(
        5,
        Box::new(RecordingVisitor(second_visitor.clone())),
        MAX_HEADER_LIST_SIZE,
    );
    second.decode(&hex("0200"));

    let state = second_visitor.borrow();
    assert_eq!(
        state.error.as_deref(),
        Some("Limit on number of blocked streams exceeded.")
    );
    assert_eq!(fx.decoder.blocked_stream_count(), 1);
}

#[test]
fn terminal_callback_fires_at_most_once() {
    let mut fx = fixture();
    fx.accumulator.decode(&hex("0000ff23ff24"));
    assert_eq!(fx.visitor.borrow().callbacks, 1);

    // Further input and closing are ignored after the error.
    fx.accumulator.decode(&hex("d1"));
    fx.accumulator.end_header_block();
    fx.accumulator.end_header_block();
    assert_eq!(fx.visitor.borrow().callbacks, 1);
}

#[test]
fn cancellation_reports_referenced_streams_only() {
    // A blocked stream that referenced the dynamic table sends Stream
    // Cancellation when cancelled.
    let mut fx = fixture();
    fx.accumulator.decode(&hex("020080"));
    assert!(fx.accumulator.is_blocked());

    fx.decoder.on_stream_cancel(TEST_STREAM_ID);
    assert_eq!(fx.decoder.blocked_stream_count(), 0);
    // Stream Cancellation instruction for stream 1.
    assert_eq!(&fx.decoder_stream.borrow()[..], &[0x41]);
    // No visitor callback for a cancelled stream.
    assert_eq!(fx.visitor.borrow().callbacks, 0);

    // A stream that never touched the dynamic table cancels silently.
    let mut fx2 = fixture();
    fx2.accumulator.decode(&hex("0000d1"));
    fx2.decoder.on_stream_cancel(TEST_STREAM_ID);
    assert!(fx2.decoder_stream.borrow().is_empty());
}
