use futures::executor::block_on;

use capnp_wire::layout::StructSize;
use capnp_wire::message::Message;
use capnp_wire::serialize;

#[test]
fn async_and_sync_writers_agree() {
    let mut message = Message::new_default();
    let root = message
        .init_root(StructSize {
            data: 2,
            pointers: 1,
        })
        .unwrap();
    root.set::<i64>(&mut message, 1, -5).unwrap();
    let list = root.init_list::<u64>(&mut message, 0, 2000).unwrap();
    list.set(&mut message, 1999, 7).unwrap();

    let mut sync_bytes = Vec::new();
    serialize::write_message(&mut sync_bytes, &message).unwrap();

    let mut async_bytes: Vec<u8> = Vec::new();
    block_on(serialize::write_message_async(&mut async_bytes, &message)).unwrap();
    assert_eq!(sync_bytes, async_bytes);

    let reloaded = Message::load(&async_bytes).unwrap();
    let root = reloaded.root_struct().unwrap();
    assert_eq!(-5, root.get::<i64>(&reloaded, 1).unwrap());
    let list = root.get_list::<u64>(&reloaded, 0).unwrap();
    assert_eq!(7, list.get(&reloaded, 1999).unwrap());
}
