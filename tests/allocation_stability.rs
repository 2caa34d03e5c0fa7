use capnp_wire::layout::StructSize;
use capnp_wire::message::{AllocationStrategy, HeapAllocator, Message};
use capnp_wire::pool::MessagePool;

#[test]
fn earlier_objects_never_move() {
    let mut message = Message::new(
        HeapAllocator::new()
            .first_segment_words(4)
            .allocation_strategy(AllocationStrategy::FixedSize),
    );
    let root = message
        .init_root(StructSize {
            data: 1,
            pointers: 16,
        })
        .unwrap();
    root.set::<u64>(&mut message, 0, 1).unwrap();

    let mut children = Vec::new();
    for i in 0..16u16 {
        let child = root
            .init_struct(
                &mut message,
                i,
                StructSize {
                    data: 3,
                    pointers: 0,
                },
            )
            .unwrap();
        child.set::<u64>(&mut message, 2, u64::from(i) + 100).unwrap();
        children.push(child);
        for (j, earlier) in children.iter().enumerate() {
            assert_eq!(j as u64 + 100, earlier.get::<u64>(&message, 2).unwrap());
        }
        assert_eq!(1, root.get::<u64>(&message, 0).unwrap());
    }
    assert!(message.segment_count() > 2);

    for (i, child) in children.iter().enumerate() {
        assert_eq!(*child, root.get_struct(&message, i as u16).unwrap());
    }
}

#[test]
fn pooled_messages_do_not_leak() {
    let mut pool = MessagePool::default();
    let mut message = pool.acquire();
    let root = message
        .init_root(StructSize {
            data: 0,
            pointers: 1,
        })
        .unwrap();
    root.set_text(&mut message, 0, "secret").unwrap();
    pool.release(message);

    let mut message = pool.acquire();
    let root = message
        .init_root(StructSize {
            data: 0,
            pointers: 1,
        })
        .unwrap();
    assert_eq!("", root.get_text(&message, 0).unwrap());
    let list = root.init_list::<u8>(&mut message, 0, 64).unwrap();
    assert!(list.iter(&message).all(|b| b.unwrap() == 0));
}
