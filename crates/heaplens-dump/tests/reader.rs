use std::io::Write;

use heaplens_dump::reader::PagedReader;

fn fixture(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(bytes).expect("write fixture");
    file.flush().expect("flush fixture");
    file
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

#[test]
fn reread_after_eviction_is_identical() {
    let data = pattern(256);
    let file = fixture(&data);
    let mut reader = PagedReader::with_page_size(file.path(), 16, 2).unwrap();

    let mut first = [0u8; 10];
    assert_eq!(reader.read_at(0, &mut first).unwrap(), 10);

    // Touch enough pages to evict the first, then force a full drop too.
    let mut scratch = [0u8; 4];
    for pos in [64u64, 128, 192] {
        reader.read_at(pos, &mut scratch).unwrap();
    }
    reader.clear_pages();
    assert_eq!(reader.cached_pages(), 0);

    let mut second = [0u8; 10];
    assert_eq!(reader.read_at(0, &mut second).unwrap(), 10);
    assert_eq!(first, second);
    assert_eq!(&first[..], &data[..10]);
}

#[test]
fn reads_spanning_page_boundaries() {
    let data = pattern(256);
    let file = fixture(&data);
    let mut reader = PagedReader::with_page_size(file.path(), 16, 4).unwrap();
    let mut buf = [0u8; 40];
    assert_eq!(reader.read_at(10, &mut buf).unwrap(), 40);
    assert_eq!(&buf[..], &data[10..50]);
}

#[test]
fn end_of_file_is_sticky_and_not_an_error() {
    let data = pattern(100);
    let file = fixture(&data);
    let mut reader = PagedReader::with_page_size(file.path(), 32, 4).unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(reader.read_at(95, &mut buf).unwrap(), 5);
    assert_eq!(&buf[..5], &data[95..]);
    assert_eq!(reader.read_at(100, &mut buf).unwrap(), 0);
    assert_eq!(reader.read_at(4096, &mut buf).unwrap(), 0);
    assert_eq!(reader.len(), 100);
}

#[test]
fn big_endian_decodes() {
    let file = fixture(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
    let mut reader = PagedReader::open(file.path()).unwrap();
    assert_eq!(reader.read_u16(0).unwrap(), 0x0102);
    assert_eq!(reader.read_u32(0).unwrap(), 0x0102_0304);
    assert_eq!(reader.read_u64(1).unwrap(), 0x0203_0405_0607_0809);
    assert_eq!(reader.read_uint(2, 3).unwrap(), 0x03_0405);
}

#[test]
fn decode_past_eof_is_unexpected_eof() {
    let file = fixture(&[0xaa, 0xbb]);
    let mut reader = PagedReader::open(file.path()).unwrap();
    let err = reader.read_u32(0).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
