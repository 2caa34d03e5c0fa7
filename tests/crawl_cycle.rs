use byteorder::{LittleEndian, WriteBytesExt};

use capnp_wire::layout::StructSize;
use capnp_wire::message::Message;
use capnp_wire::pointer::WirePointer;
use capnp_wire::serialize;

/// Segment 0 holds the root, a far pointer into segment 1. Segment 1 holds the landing pad
/// and a struct whose only pointer is a far pointer back to the root word.
fn cyclic() -> Message {
    let segments: [&[WirePointer]; 2] = [
        &[WirePointer::new_far(false, 0, 1)],
        &[
            WirePointer::new_struct(
                0,
                StructSize {
                    data: 0,
                    pointers: 1,
                },
            ),
            WirePointer::new_far(false, 0, 0),
        ],
    ];
    let mut bytes = Vec::new();
    bytes.write_u32::<LittleEndian>(1).unwrap(); // 2 segments
    bytes.write_u32::<LittleEndian>(1).unwrap();
    bytes.write_u32::<LittleEndian>(2).unwrap();
    bytes.write_u32::<LittleEndian>(0).unwrap(); // padding
    for segment in segments {
        for word in segment {
            bytes.write_u64::<LittleEndian>(word.word()).unwrap();
        }
    }
    Message::load(&bytes).unwrap()
}

#[test]
fn revisit_is_reported_once() {
    let message = cyclic();
    let mut out = String::new();
    let report = message.crawl(&mut out, false, None).unwrap();

    assert_eq!(3, report.visited);
    assert_eq!(1, report.revisits.len());
    assert_eq!(message.root(), report.revisits[0]);
    assert_eq!(1, out.matches("(duplicated; recursion is likely)").count());
}

#[test]
fn normal_access_rejects_the_cycle() {
    let message = cyclic();
    let root = message.root_struct().unwrap();
    assert_eq!(1, root.size().pointers);
    assert!(root.get_struct(&message, 0).is_err());
}

#[test]
fn well_formed_messages_have_no_revisits() {
    let mut message = Message::new_default();
    let root = message
        .init_root(StructSize {
            data: 1,
            pointers: 1,
        })
        .unwrap();
    root.set_text(&mut message, 0, "abc").unwrap();
    let bytes = serialize::write_message_to_bytes(&message).unwrap();
    let message = Message::load(&bytes).unwrap();

    let mut out = String::new();
    let report = message.crawl(&mut out, true, None).unwrap();
    assert_eq!(2, report.visited);
    assert!(report.revisits.is_empty());
}
