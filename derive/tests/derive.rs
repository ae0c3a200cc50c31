use strux::{Construct, Expr, Value};
use strux_macros::Layout;

#[derive(Layout)]
struct FrameHeader {
    #[strux(Construct::u16_be())]
    version: (),
    #[strux(Construct::u32_be())]
    length: (),
}

#[test]
fn derived_layout_parses_in_field_order() {
    let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x0A];
    let parsed = FrameHeader::layout().parse(&bytes).unwrap();
    let container = parsed.as_container().unwrap();
    assert_eq!(container.get("version").unwrap().as_int().unwrap(), 1);
    assert_eq!(container.get("length").unwrap().as_int().unwrap(), 10);
}

#[test]
fn derived_layout_round_trips() {
    let bytes = [0x00, 0x02, 0x00, 0x00, 0x01, 0x00];
    let parsed = FrameHeader::layout().parse(&bytes).unwrap();
    let rebuilt = FrameHeader::layout().build(&parsed).unwrap();
    assert_eq!(rebuilt, bytes);
}

#[derive(Layout)]
struct Record {
    #[strux(Construct::u8_())]
    count: (),
    #[strux(Construct::array(Expr::field("count"), Construct::u8_()))]
    items: (),
}

#[test]
fn derived_layout_fields_can_reference_earlier_siblings() {
    let bytes = [0x03, 10, 20, 30];
    let parsed = Record::layout().parse(&bytes).unwrap();
    let container = parsed.as_container().unwrap();
    let items = container.get("items").unwrap().as_list().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items.get(1).unwrap(), &Value::Int(20));
}
