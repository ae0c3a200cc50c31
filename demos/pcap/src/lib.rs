//! A minimal libpcap reader built from `strux` constructs, mirroring the shape of the
//! hand-rolled tuple reader this crate replaces: a fixed global header followed by a
//! greedy run of (packet header, payload) records.

use strux::{Construct, Expr};

pub const MAGIC: i128 = 0xa1b2_c3d4;

fn header_layout() -> Construct {
    Construct::struct_(vec![
        Construct::validator(Construct::u32_le(), "not a little-endian pcap file", |v, _ctx| {
            Ok(v.as_int()? == MAGIC)
        })
        .named("magic"),
        Construct::u16_le().named("version_major"),
        Construct::u16_le().named("version_minor"),
        Construct::i32_le().named("ts_correction"),
        Construct::u32_le().named("ts_accuracy"),
        Construct::u32_le().named("snaplen"),
        Construct::u32_le().named("datalink"),
    ])
}

fn packet_layout() -> Construct {
    Construct::struct_(vec![
        Construct::u32_le().named("ts_sec"),
        Construct::u32_le().named("ts_usec"),
        Construct::u32_le().named("incl_len"),
        Construct::u32_le().named("orig_len"),
        Construct::bytes_dyn(Expr::field("incl_len")).named("data"),
    ])
}

/// The whole-file layout: one header followed by as many packets as fit.
pub fn file_layout() -> Construct {
    Construct::struct_(vec![
        header_layout().named("header"),
        Construct::greedy_range_of(packet_layout()).named("packets"),
    ])
}
