mod common;

use std::time::Instant;

use fc_net::manager::SlaveEvent;
use fc_types::SlaveStatus;

use common::{advert, mac, manager};

#[test]
fn three_adverts_appear_in_arrival_order() {
    let (mut mgr, _rx) = manager(4, 3);
    let now = Instant::now();

    mgr.observe(advert(1, 4), now);
    mgr.observe(advert(2, 4), now);
    mgr.observe(advert(3, 4), now);

    let slaves = mgr.slaves_vector();
    assert_eq!(slaves.len(), 3);
    for (i, entry) in slaves.iter().enumerate() {
        assert_eq!(entry.index, i);
        assert_eq!(entry.status, SlaveStatus::Known);
        assert_eq!(entry.fan_count, 4);
        assert_eq!(entry.version, "IV-1");
    }
    assert_eq!(slaves[0].mac, mac(1));
    assert_eq!(slaves[2].mac, mac(3));

    let events = mgr.drain_events();
    assert_eq!(
        events,
        vec![
            SlaveEvent::Discovered { index: 0, mac: mac(1) },
            SlaveEvent::Discovered { index: 1, mac: mac(2) },
            SlaveEvent::Discovered { index: 2, mac: mac(3) },
        ]
    );
}

#[test]
fn indices_are_stable_across_repeat_adverts() {
    let (mut mgr, _rx) = manager(4, 3);
    let now = Instant::now();

    mgr.observe(advert(1, 4), now);
    mgr.observe(advert(2, 4), now);
    mgr.observe(advert(1, 4), now);

    assert_eq!(mgr.index_for(&mac(1)), 0);
    assert_eq!(mgr.index_for(&mac(2)), 1);
    assert_eq!(mgr.slave_count(), 2);
}

#[test]
fn reheard_heartbeat_promotes_known_to_connected() {
    let (mut mgr, _rx) = manager(4, 3);
    let now = Instant::now();

    mgr.observe(advert(1, 4), now);
    assert_eq!(mgr.status_of(&mac(1)), Some(SlaveStatus::Known));

    mgr.observe(advert(1, 4), now);
    assert_eq!(mgr.status_of(&mac(1)), Some(SlaveStatus::Connected));
    // Connected implies a live endpoint.
    assert!(mgr.endpoint_of(&mac(1)).is_some());
}

#[test]
fn saved_slaves_reserve_their_indices() {
    let (mut mgr, _rx) = manager(4, 3);
    mgr.register_saved(&[
        (mac(7), "Saved A".into(), 4),
        (mac(8), "Saved B".into(), 4),
    ]);
    assert_eq!(mgr.slave_count(), 2);
    assert_eq!(mgr.status_of(&mac(7)), Some(SlaveStatus::Available));

    // A new slave lands after the reserved block.
    let now = Instant::now();
    mgr.observe(advert(1, 4), now);
    assert_eq!(mgr.index_for(&mac(1)), 2);

    // The saved slave keeps index 0 when it finally answers.
    mgr.observe(advert(7, 4), now);
    assert_eq!(mgr.index_for(&mac(7)), 0);
    assert_eq!(mgr.status_of(&mac(7)), Some(SlaveStatus::Known));
}

#[test]
fn feedback_vector_tracks_slave_count() {
    let (mut mgr, _rx) = manager(4, 3);
    let now = Instant::now();
    assert_eq!(mgr.feedback_vector().len(), 0);

    mgr.observe(advert(1, 4), now);
    assert_eq!(mgr.feedback_vector().len(), 2 * 1 * 4);

    mgr.observe(advert(2, 4), now);
    mgr.observe(advert(3, 4), now);
    assert_eq!(mgr.feedback_vector().len(), 2 * 3 * 4);
}
