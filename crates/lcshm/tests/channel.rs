//! Real-OS smoke test: open the actual kernel objects, lock, exchange a
//! message, clear, unlock.
//!
//! CI containers sometimes deny SysV or named-semaphore objects; an
//! `Unavailable` open degrades to a skip rather than a failure. Uses the
//! per-user scope so a shared host is not disturbed, and runs as one
//! sequential test because every handle converges on the same semaphore.

use lcshm::{Envelope, LcshmError, Message, ShmChannel};

#[test]
fn smoke_channel_lifecycle() {
    let mut channel = match ShmChannel::open(true) {
        Ok(channel) => channel,
        Err(LcshmError::Unavailable(e)) => {
            eprintln!("skipping channel smoke test (IPC unavailable): {e}");
            return;
        }
        Err(e) => panic!("unexpected open failure: {e}"),
    };
    let mut other = ShmChannel::open(true).unwrap();

    let message = Message {
        tick: lcshm::nonzero_tick(),
        name: "_smoke".into(),
        host: "localhost".into(),
        envelope: Envelope::V1,
        method: "ping".into(),
        data: vec![0xDE, 0xAD],
    };

    // Write, peek, read and clear under one lock; a second handle cannot
    // enter the critical section meanwhile.
    {
        let mut region = channel.lock().unwrap();
        assert!(other.try_lock().unwrap().is_none());

        region.write_message(&message).unwrap();
        assert_eq!(region.message_tick(), message.tick);
        assert_eq!(region.read_message().unwrap().unwrap(), message);

        region.clear_message();
        assert_eq!(region.message_tick(), 0);
        assert!(region.read_message().unwrap().is_none());
        region.unlock().unwrap();
    }

    // The released semaphore admits the second handle, which sees the
    // same, now empty, slot.
    let region = match other.try_lock().unwrap() {
        Some(region) => region,
        None => panic!("semaphore still held after unlock"),
    };
    assert_eq!(region.message_tick(), 0);
    region.unlock().unwrap();
}
