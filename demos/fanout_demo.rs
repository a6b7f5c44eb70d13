// Single-process illustration of spec's E1 happy-path fan-out scenario:
// one server, two clients, one published slot, full recycle.
//
// A real deployment has the server and each client in separate OS
// processes, with `MemoryExchangeHandle`s crossing that boundary and a
// `Transport` carrying the handshake (see `Connection::Protocol`). This
// demo still goes through the real `memfd_create`+`mmap` backend
// (`PosixShmProvider`) and the real export/map round trip on both sides —
// it just runs both ends of that round trip in one process, standing in
// for the handshake a `Transport` implementation would otherwise carry.

use shm_ipc_core::Core::{
    ClientMemoryManager, MemoryLayout, MemoryProvider, PosixShmProvider, ServerMemoryManager,
};

const NUM_SLOTS: u32 = 4;
const SLOT_CONTENT_SIZE: usize = 64;
const SLOT_CONTENT_ALIGNMENT: usize = 8;
const MAX_RECEIVERS: u32 = 2;

fn main() {
    tracing_subscriber::fmt::init();

    let provider = PosixShmProvider::new();

    let server_layout =
        MemoryLayout::new(NUM_SLOTS, SLOT_CONTENT_SIZE, SLOT_CONTENT_ALIGNMENT, MAX_RECEIVERS)
            .expect("valid server layout");
    let server = ServerMemoryManager::new(server_layout, &provider).expect("allocate server memory");

    // Each client: maps the server's slot/queue memory (as a real client
    // would after the handshake hands it those two exchange handles), and
    // the server maps the client's own "free" queue memory back (as the
    // server would after the client hands it its own handle + config).
    struct ClientSide {
        client: ClientMemoryManager,
        free_producer: shm_ipc_core::Core::SpscProducerEnd,
        available_consumer: shm_ipc_core::Core::SpscConsumerEnd,
    }
    struct ServerSide {
        // Keeps the server's mapping of this client's free-queue memory
        // alive for as long as `free_consumer` reads through it.
        _mapped_client_queue_memory: shm_ipc_core::Core::OwnedMemory,
        available_producer: shm_ipc_core::Core::SpscProducerEnd,
        free_consumer: shm_ipc_core::Core::SpscConsumerEnd,
    }

    let mut client_sides = Vec::new();
    let mut server_sides = Vec::new();

    for client_index in 0..MAX_RECEIVERS {
        let client_layout =
            MemoryLayout::new(NUM_SLOTS, SLOT_CONTENT_SIZE, SLOT_CONTENT_ALIGNMENT, 1)
                .expect("valid client layout");
        let mut client =
            ClientMemoryManager::new(client_layout, &provider).expect("allocate client queue memory");
        client
            .attach_server_memory(&provider, &server.slot_memory_handle(), &server.queue_memory_handle())
            .expect("map server memory");

        let server_queue_config = server.queue_config(client_index);
        let (free_producer, available_consumer) = client
            .initialize_queue_ends(&server_queue_config)
            .expect("valid server queue config");

        let client_queue_config = client.own_queue_config();
        let mut mapped_client_queue_memory = provider
            .map(&client.own_queue_handle())
            .expect("server maps client's free-queue memory");
        let (available_producer, free_consumer) = server
            .initialize_queue_ends(client_index, &client_queue_config, unsafe {
                mapped_client_queue_memory.as_mut_slice()
            })
            .expect("valid client queue config");

        client_sides.push(ClientSide {
            client,
            free_producer,
            available_consumer,
        });
        server_sides.push(ServerSide {
            _mapped_client_queue_memory: mapped_client_queue_memory,
            available_producer,
            free_consumer,
        });
    }

    // Server writes one slot and publishes it to every client.
    {
        let mut slot = server.writable_slot(0);
        slot.data().fill(0xAA);
        slot.publish();
        println!("server: wrote slot 0, visible = {}", slot.is_visible());
    }
    for side in &server_sides {
        assert!(side.available_producer.push(0).expect("push index 0"));
    }

    // Each client pops, reads, and releases it back onto its free queue.
    for (index, side) in client_sides.iter().enumerate() {
        let popped = side.available_consumer.pop().expect("pop index").expect("non-empty");
        let slot = side.client.readable_slot(popped);
        assert!(slot.is_visible());
        assert_eq!(slot.data(), &[0xAA; SLOT_CONTENT_SIZE][..]);
        assert!(side.free_producer.push(popped).expect("push to free queue"));
        println!("client {index}: read slot {popped}, released back to server");
    }

    // Server reclaims the slot once every client has returned it.
    for side in &server_sides {
        let freed = side.free_consumer.pop().expect("pop free index").expect("non-empty");
        assert_eq!(freed, 0);
    }
    {
        let slot = server.writable_slot(0);
        slot.retract();
        println!("server: recycled slot 0, visible = {}", slot.is_visible());
    }

    println!("fanout_demo: E1 happy-path fan-out completed");
}
