//! End-to-end scenarios driving real clients against a real coordinator,
//! verifying the full connect/sync/accept/reject pipeline and convergence.

use gridsync::{CellType, PeerInfo, SharedServer, SyncClient, SyncEvent, SyncServer};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn shared_server() -> SharedServer {
    Arc::new(Mutex::new(SyncServer::with_defaults()))
}

fn data(client: &SyncClient) -> Value {
    serde_json::from_str(&client.get_data()).unwrap()
}

fn server_data(server: &SharedServer) -> Value {
    serde_json::from_str(&server.lock().unwrap().table_json()).unwrap()
}

fn row_order(server: &SharedServer) -> Vec<String> {
    server.lock().unwrap().snapshot().row_order().to_vec()
}

/// The edit sequence shared by the first two scenarios, with the expected
/// final table.
fn scenario_one_edits(client: &SyncClient, from: usize, to: usize) {
    let edits: [&dyn Fn(&SyncClient); 9] = [
        &|c| {
            c.create_row("ABC").unwrap();
        },
        &|c| {
            c.create_row("DEF").unwrap();
        },
        &|c| {
            c.create_column("123", CellType::Text).unwrap();
        },
        &|c| {
            c.create_column("456", CellType::Number).unwrap();
        },
        &|c| {
            c.update_text_cell("ABC", "123", "foo").unwrap();
        },
        &|c| {
            c.update_number_cell("ABC", "456", 1.0).unwrap();
        },
        &|c| {
            c.update_number_cell("DEF", "456", 2.0).unwrap();
        },
        &|c| {
            c.update_column_type("456", CellType::Text).unwrap();
        },
        &|c| {
            c.update_text_cell("ABC", "456", "3").unwrap();
        },
    ];
    for edit in &edits[from..to] {
        edit(client);
    }
}

fn scenario_one_expected() -> Value {
    json!({
        "columns": [
            { "id": "123", "type": "text" },
            { "id": "456", "type": "text" }
        ],
        "rows": [
            { "id": "ABC", "cellValuesByColumnId": { "123": "foo", "456": "3" } },
            { "id": "DEF", "cellValuesByColumnId": { "456": "2" } }
        ]
    })
}

#[test]
fn test_online_single_client_edits() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();

    scenario_one_edits(&a, 0, 9);

    // The type change coerces the stored number 2 into the string "2"; the
    // explicit write of "3" lands after the coercion.
    assert_eq!(data(&a), scenario_one_expected());
    assert_eq!(server_data(&server), scenario_one_expected());
    assert!(server.lock().unwrap().snapshot().is_consistent());
}

#[test]
fn test_offline_then_online_matches_online_execution() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();

    // First six edits online, the rest offline.
    scenario_one_edits(&a, 0, 6);
    a.go_offline();
    scenario_one_edits(&a, 6, 9);
    assert_eq!(a.outbox_len(), 3);

    // The offline view already shows the replayed outbox.
    assert_eq!(data(&a), scenario_one_expected());

    a.come_online().unwrap();
    assert_eq!(a.outbox_len(), 0);
    assert_eq!(server_data(&server), scenario_one_expected());
    assert_eq!(data(&a), scenario_one_expected());
}

#[test]
fn test_conflicting_offline_writes_last_arrival_wins() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();

    a.create_row("ABC").unwrap();
    a.create_column("123", CellType::Text).unwrap();
    a.update_text_cell("ABC", "123", "foo").unwrap();
    assert_eq!(b.version(), 3);

    a.go_offline();
    b.go_offline();
    a.update_text_cell("ABC", "123", "bar").unwrap();
    b.update_text_cell("ABC", "123", "baz").unwrap();

    // B reconnects first; A's edit arrives last and wins.
    b.come_online().unwrap();
    a.come_online().unwrap();

    let expected = json!({
        "columns": [ { "id": "123", "type": "text" } ],
        "rows": [ { "id": "ABC", "cellValuesByColumnId": { "123": "bar" } } ]
    });
    assert_eq!(server_data(&server), expected);
    assert_eq!(data(&a), expected);
    assert_eq!(data(&b), expected);
}

#[test]
fn test_concurrent_row_moves_across_intervening_delete() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();
    let c = SyncClient::online(PeerInfo::new("C"), Arc::clone(&server)).unwrap();

    for row in ["A", "B", "C", "D", "E", "F"] {
        a.create_row(row).unwrap();
    }
    assert_eq!(b.version(), 6);
    assert_eq!(c.version(), 6);

    a.go_offline();
    b.go_offline();
    c.go_offline();

    // Three clients edit the same baseline [A,B,C,D,E,F] independently.
    a.destroy_row("A").unwrap();
    a.create_row("G").unwrap();
    b.move_row("C", 5).unwrap();
    c.move_row("F", 3).unwrap();

    a.come_online().unwrap();
    b.come_online().unwrap();
    c.come_online().unwrap();

    // B's target 5 is rewritten through A's deletion; C's target 3 through
    // the deletion and B's accepted move.
    assert_eq!(row_order(&server), ["B", "F", "D", "E", "C", "G"]);
    for client in [&a, &b, &c] {
        assert_eq!(data(client), server_data(&server));
    }
    assert_eq!(server.lock().unwrap().stats().accepted, 10);
}

#[test]
fn test_dependent_group_rejection() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();

    a.create_row("ABC").unwrap();
    a.create_column("123", CellType::Text).unwrap();
    a.update_text_cell("ABC", "123", "foo").unwrap();
    a.go_offline();

    // "foo" cannot coerce to a number, so the type change will be rejected;
    // the cell write shares its group and is dependent on it sticking.
    let doomed = a.update_column_type("123", CellType::Number).unwrap();
    a.update_text_cell("ABC", "123", "bar").unwrap();

    a.come_online().unwrap();

    {
        let server = server.lock().unwrap();
        let stats = server.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.elided, 1);
        assert_eq!(server.current_version(), 3);
    }
    let expected = json!({
        "columns": [ { "id": "123", "type": "text" } ],
        "rows": [ { "id": "ABC", "cellValuesByColumnId": { "123": "foo" } } ]
    });
    assert_eq!(server_data(&server), expected);
    assert_eq!(data(&a), expected);

    let events = a.take_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SyncEvent::Rejected { message_id, .. } if *message_id == doomed)));

    // A's group is still the poisoned one (nothing was accepted and the
    // reconnect sync carried no newer version), so further edits in it are
    // elided too.
    a.create_row("ignored").unwrap();
    assert_eq!(server.lock().unwrap().stats().elided, 2);

    // Another client's accepted edit rotates A's group and unblocks it.
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();
    b.create_row("DEF").unwrap();
    a.update_text_cell("DEF", "123", "baz").unwrap();

    assert_eq!(
        server_data(&server),
        json!({
            "columns": [ { "id": "123", "type": "text" } ],
            "rows": [
                { "id": "ABC", "cellValuesByColumnId": { "123": "foo" } },
                { "id": "DEF", "cellValuesByColumnId": { "123": "baz" } }
            ]
        })
    );
}

#[test]
fn test_concurrent_column_type_changes_later_arrival_wins() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();
    let c = SyncClient::online(PeerInfo::new("C"), Arc::clone(&server)).unwrap();

    a.create_row("R").unwrap();
    a.create_column("C", CellType::Text).unwrap();
    a.update_text_cell("R", "C", "12").unwrap();

    b.go_offline();
    c.go_offline();
    b.update_column_type("C", CellType::Number).unwrap();
    c.update_column_type("C", CellType::Text).unwrap();

    // B's change lands first and coerces "12" to 12; C's later change wins
    // the final state and coerces it back to "12".
    b.come_online().unwrap();
    assert_eq!(
        server_data(&server),
        json!({
            "columns": [ { "id": "C", "type": "number" } ],
            "rows": [ { "id": "R", "cellValuesByColumnId": { "C": 12 } } ]
        })
    );

    c.come_online().unwrap();
    let expected = json!({
        "columns": [ { "id": "C", "type": "text" } ],
        "rows": [ { "id": "R", "cellValuesByColumnId": { "C": "12" } } ]
    });
    assert_eq!(server_data(&server), expected);
    assert_eq!(server.lock().unwrap().stats().accepted, 5);
    for client in [&a, &b, &c] {
        assert_eq!(data(client), expected);
    }
}

#[test]
fn test_connected_mirrors_track_the_authority() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();

    a.create_row("r1").unwrap();
    assert_eq!(data(&b), server_data(&server));

    b.create_column("c", CellType::Number).unwrap();
    assert_eq!(data(&a), server_data(&server));

    a.update_number_cell("r1", "c", 7.0).unwrap();
    b.move_row("r1", 0).unwrap();
    assert_eq!(data(&a), server_data(&server));
    assert_eq!(data(&b), server_data(&server));
    assert!(server.lock().unwrap().snapshot().is_consistent());
}

#[test]
fn test_accepted_broadcasts_arrive_in_version_order() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();

    for i in 0..5 {
        a.create_row(format!("r{i}")).unwrap();
        b.create_column(format!("c{i}"), CellType::Text).unwrap();
    }

    for client in [&a, &b] {
        let versions: Vec<u64> = client
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Accepted { version, .. } => Some(version),
                _ => None,
            })
            .collect();
        assert_eq!(versions.len(), 10);
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_message_ids_unique_across_run() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::new(PeerInfo::new("B"), Arc::clone(&server));

    let mut ids = HashSet::new();
    for i in 0..20 {
        ids.insert(a.create_row(format!("a{i}")).unwrap());
        ids.insert(b.create_row(format!("b{i}")).unwrap());
    }
    assert_eq!(ids.len(), 40);
}

#[test]
fn test_offline_client_resyncs_on_reconnect() {
    let server = shared_server();
    let a = SyncClient::online(PeerInfo::new("A"), Arc::clone(&server)).unwrap();
    let b = SyncClient::online(PeerInfo::new("B"), Arc::clone(&server)).unwrap();
    assert_ne!(a.peer_id(), b.peer_id());

    b.go_offline();
    a.create_row("while-b-away").unwrap();
    a.create_column("c", CellType::Text).unwrap();

    // B missed the broadcasts entirely.
    assert_eq!(b.version(), 0);

    // On reconnect it receives a full sync of the materialized table.
    b.come_online().unwrap();
    assert_eq!(b.version(), 2);
    assert_eq!(data(&b), server_data(&server));
}
