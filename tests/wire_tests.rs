use dgraph_nd::algs::communicator::CommTag;
use dgraph_nd::algs::wire::{GnumReader, GnumWriter, WireCoarseLink, WireError, decode_gnums, decode_records};

#[test]
fn commtag_offset_keeps_substeps_apart() {
    let t = CommTag::MATCH_REQUEST.offset(1);
    assert_ne!(t, CommTag::MATCH_REQUEST);
    assert_eq!(t.as_u16(), CommTag::MATCH_REQUEST.as_u16() + 1);
}

#[test]
fn partial_records_are_rejected() {
    let err = decode_records::<WireCoarseLink>(&[0u8; 20]).unwrap_err();
    assert_eq!(err, WireError::Length { len: 20, record: 16 });
    assert!(decode_gnums(&[1, 2, 3]).is_err());
}

#[test]
fn reader_stops_at_truncation() {
    let mut w = GnumWriter::default();
    w.put(3);
    w.put_all(&[7, 8]);
    let bytes = w.into_bytes();
    let mut r = GnumReader::new(&bytes);
    let n = r.next_len().unwrap();
    let mut out = Vec::new();
    assert_eq!(r.read_into(n, &mut out), Err(WireError::Truncated { at: 24 }));
    assert_eq!(out, vec![7, 8]);
}

#[test]
fn negative_counts_are_not_lengths() {
    let mut w = GnumWriter::default();
    w.put(-4);
    let bytes = w.into_bytes();
    assert!(GnumReader::new(&bytes).next_len().is_err());
}
