#[test]
fn reads_sample_capture() {
    let bytes = include_bytes!("sample.pcap");
    let parsed = demo_pcap::file_layout().parse(bytes).unwrap();
    let container = parsed.as_container().unwrap();

    let header = container.get("header").unwrap().as_container().unwrap();
    assert_eq!(header.get("magic").unwrap().as_int().unwrap(), demo_pcap::MAGIC);
    assert_eq!(header.get("version_major").unwrap().as_int().unwrap(), 2);
    assert_eq!(header.get("version_minor").unwrap().as_int().unwrap(), 4);

    let packets = container.get("packets").unwrap().as_list().unwrap();
    assert_eq!(packets.len(), 3);

    let first = packets.get(0).unwrap().as_container().unwrap();
    assert_eq!(first.get("data").unwrap().as_bytes().unwrap(), &[0xde, 0xad, 0xbe, 0xef]);

    let last = packets.get(2).unwrap().as_container().unwrap();
    assert_eq!(last.get("data").unwrap().as_bytes().unwrap(), &[0xff]);
}

#[test]
fn round_trips_the_whole_capture() {
    let bytes = include_bytes!("sample.pcap");
    let layout = demo_pcap::file_layout();
    let parsed = layout.parse(bytes).unwrap();
    let rebuilt = layout.build(&parsed).unwrap();
    assert_eq!(rebuilt, bytes);
}

#[test]
fn rejects_a_bad_magic() {
    let mut bytes = include_bytes!("sample.pcap").to_vec();
    bytes[0] ^= 0xFF;
    assert!(demo_pcap::file_layout().parse(&bytes).is_err());
}
