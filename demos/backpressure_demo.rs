// Single-process illustration of spec's E2 backpressure scenario: a server
// with a 2-slot channel and one client that never drains its available
// queue. The third publish attempt must return `Ok(false)` rather than
// losing a slot index or panicking.

use shm_ipc_core::Core::{
    ClientMemoryManager, MemoryLayout, MemoryProvider, PosixShmProvider, ServerMemoryManager,
};

fn main() {
    const NUM_SLOTS: u32 = 2;
    const SLOT_CONTENT_SIZE: usize = 16;
    const SLOT_CONTENT_ALIGNMENT: usize = 8;

    let provider = PosixShmProvider::new();

    let server_layout = MemoryLayout::new(NUM_SLOTS, SLOT_CONTENT_SIZE, SLOT_CONTENT_ALIGNMENT, 1)
        .expect("valid server layout");
    let server = ServerMemoryManager::new(server_layout, &provider).expect("allocate server memory");

    let client_layout = MemoryLayout::new(NUM_SLOTS, SLOT_CONTENT_SIZE, SLOT_CONTENT_ALIGNMENT, 1)
        .expect("valid client layout");
    let mut client =
        ClientMemoryManager::new(client_layout, &provider).expect("allocate client queue memory");
    client
        .attach_server_memory(&provider, &server.slot_memory_handle(), &server.queue_memory_handle())
        .expect("map server memory");

    let mut mapped_client_queue_memory = provider
        .map(&client.own_queue_handle())
        .expect("server maps client's free-queue memory");
    let (available_producer, _free_consumer) = server
        .initialize_queue_ends(0, &client.own_queue_config(), unsafe {
            mapped_client_queue_memory.as_mut_slice()
        })
        .expect("valid client queue config");

    // Publish both slots; the client never pops.
    for index in 0..NUM_SLOTS {
        let mut slot = server.writable_slot(index);
        slot.data().fill(0xBB);
        slot.publish();
        let enqueued = available_producer.push(index).expect("queue not corrupted");
        println!("server: published slot {index}, enqueued = {enqueued}");
        assert!(enqueued);
    }

    // A third publish attempt has nowhere to go: the queue is full.
    let mut overflow_slot = server.writable_slot(0);
    overflow_slot.data().fill(0xCC);
    overflow_slot.publish();
    let enqueued = available_producer.push(0).expect("queue not corrupted");
    println!("server: third publish attempt, enqueued = {enqueued}");
    assert!(!enqueued, "queue should report full rather than silently drop or overwrite");

    println!("backpressure_demo: E2 backpressure completed, no slot index lost, no crash");
}
