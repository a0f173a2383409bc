use lego_hub_controller::transport::{boost_profile, uuid_key, wedo2_profile, SimulatedTransport, WriteRecord};
use lego_hub_controller::*;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

fn wedo2_hub(id: &str, name: &str) -> HubAdvertisement {
    HubAdvertisement {
        id: HubId::new(id),
        local_name: Some(name.to_owned()),
        service_ids: vec!["00001523-1212-efde-1523-785feabcd123".to_owned()],
        rssi: Some(-55),
    }
}

fn boost_hub(id: &str) -> HubAdvertisement {
    HubAdvertisement {
        id: HubId::new(id),
        local_name: Some("LEGO Move Hub".to_owned()),
        service_ids: vec!["00001623-1212-efde-1623-785feabcd123".to_owned()],
        rssi: Some(-70),
    }
}

fn start(transport: &SimulatedTransport) -> (HubHandle, broadcast::Receiver<HubEvent>, JoinHandle<()>) {
    let (handle, task) = HubDriver::new(transport.clone(), DriverConfig::default()).spawn();
    let events = handle.subscribe();
    (handle, events, task)
}

async fn next_event(
    events: &mut broadcast::Receiver<HubEvent>,
    wanted: impl Fn(&HubEvent) -> bool,
) -> HubEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream open");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event within timeout")
}

fn is_port_event(event: &HubEvent) -> bool {
    matches!(event, HubEvent::Port { .. })
}

fn on_channel(write: &WriteRecord, short_id: &str) -> bool {
    uuid_key(&write.characteristic).contains(short_id)
}

fn boost_motor_writes(writes: &[WriteRecord]) -> Vec<&WriteRecord> {
    writes
        .iter()
        .filter(|w| w.data.len() == 7 && w.data[2] == 0x81 && w.data[5] == 0x07)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn wedo2_motor_end_to_end() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);

    let id = handle.connect().await.unwrap();
    assert_eq!(
        next_event(&mut events, |e| matches!(e, HubEvent::Connected(_))).await,
        HubEvent::Connected(id.clone())
    );
    transport.take_writes();

    transport.notify(&id, "1527", &[1, 1, 0, 1]);
    let event = next_event(&mut events, is_port_event).await;
    assert_eq!(
        event,
        HubEvent::Port {
            port: PortId::for_hub(HubType::WeDo2, 1).unwrap(),
            attached: true,
            device: DeviceKind::Motor,
            hub: id.clone(),
        }
    );
    let setup = transport.take_writes();
    assert_eq!(setup.len(), 1);
    assert!(on_channel(&setup[0], "1563"));
    assert_eq!(setup[0].data, vec![0x01, 0x02, 1, 1, 0x02, 0x01, 0, 0, 0, 0x00, 0x01]);

    let target = handle.set_motor(50, Some(1), Some((&id).into())).await.unwrap();
    assert_eq!(target, Some(id.clone()));
    sleep(Duration::from_millis(300)).await;

    let writes = transport.take_writes();
    assert_eq!(writes.len(), 1);
    assert!(on_channel(&writes[0], "1565"));
    let frame = &writes[0].data;
    assert_eq!(frame.len(), 4);
    assert_eq!(frame[..3], [1, 0x01, 0x02]);
    assert!((15..=97).contains(&frame[3]));

    // Same speed again: nothing new to send
    handle.set_motor(50, Some(1), None).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    assert!(transport.take_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn boost_activation_and_rename_wait_for_settle() {
    let transport = SimulatedTransport::new();
    transport.add_hub(boost_hub("boost"), boost_profile());
    let (handle, _events, _task) = start(&transport);

    handle.connect().await.unwrap();
    // Queued while the hub settles; the call itself does not wait
    handle.set_device_name("Rover", None).await.unwrap();
    assert_eq!(transport.writes().len(), 1);

    sleep(Duration::from_millis(1100)).await;
    let writes = transport.take_writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0].data, vec![0x05, 0x00, 0x01, 0x02, 0x02]);
    assert_eq!(writes[1].data, vec![0x05, 0x00, 0x01, 0x06, 0x02]);
    assert!(writes[1].at - writes[0].at >= Duration::from_millis(500));
    assert_eq!(
        writes[2].data,
        vec![0x0a, 0x00, 0x01, 0x01, 0x01, b'R', b'o', b'v', b'e', b'r']
    );
    assert!(writes[2].at - writes[1].at >= Duration::from_millis(500));
    assert_eq!(handle.port_list(Some("Rover".into())).await.unwrap(), Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn settling_boost_hub_does_not_stall_other_hubs() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);
    let wedo = handle.connect().await.unwrap();
    transport.notify(&wedo, "1527", &[1, 1, 0, 1]);
    next_event(&mut events, is_port_event).await;

    let boost = HubId::new("boost");
    transport.add_hub(boost_hub("boost"), boost_profile());
    transport.advertise(&boost);
    // The Boost hub is now inside its post-connect delay
    sleep(Duration::from_millis(1)).await;

    let asked = tokio::time::Instant::now();
    handle.set_motor(50, Some(1), Some((&wedo).into())).await.unwrap();
    assert!(asked.elapsed() < Duration::from_millis(10));
    handle.set_device_name("Rover", Some((&boost).into())).await.unwrap();
    assert!(asked.elapsed() < Duration::from_millis(10));

    sleep(Duration::from_millis(200)).await;
    let writes = transport.take_writes();
    let motor = writes
        .iter()
        .find(|w| w.hub == wedo && on_channel(w, "1565"))
        .expect("motor write");
    assert!(motor.at - asked < Duration::from_millis(200));
    assert_eq!(writes.iter().filter(|w| w.hub == boost).count(), 1);

    sleep(Duration::from_secs(1)).await;
    let late: Vec<_> = transport.take_writes().into_iter().filter(|w| w.hub == boost).collect();
    assert_eq!(late.len(), 2);
    assert_eq!(late[1].data[5..], *b"Rover");
}

#[tokio::test(start_paused = true)]
async fn boost_motors_are_staggered() {
    let transport = SimulatedTransport::new();
    transport.add_hub(boost_hub("boost"), boost_profile());
    let (handle, mut events, _task) = start(&transport);
    let id = handle.connect().await.unwrap();

    transport.notify(&id, "1624", &[0x06, 0x00, 0x04, 0x01, 0x01, 0x01]);
    transport.notify(&id, "1624", &[0x06, 0x00, 0x04, 0x02, 0x01, 0x01]);
    next_event(&mut events, is_port_event).await;
    next_event(&mut events, is_port_event).await;
    transport.take_writes();

    handle.set_motor(60, Some(1), None).await.unwrap();
    handle.set_motor(-60, Some(2), None).await.unwrap();
    sleep(Duration::from_millis(300)).await;

    let writes = transport.take_writes();
    let motors = boost_motor_writes(&writes);
    assert_eq!(motors.len(), 2);
    assert_eq!(motors[0].data[3], 1);
    assert_eq!(motors[1].data[3], 2);
    assert!(motors[1].at - motors[0].at >= Duration::from_millis(11));
    assert!(motors[0].data[6] > 0 && motors[0].data[6] <= 97);
    assert!(motors[1].data[6] >= 160);
}

#[tokio::test(start_paused = true)]
async fn link_loss_tears_down_session() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);
    let id = handle.connect().await.unwrap();

    transport.notify(&id, "1527", &[2, 1, 0, 34]);
    next_event(&mut events, is_port_event).await;

    transport.drop_link(&id);
    assert_eq!(
        next_event(&mut events, |e| matches!(e, HubEvent::Disconnected(_))).await,
        HubEvent::Disconnected(id)
    );
    assert_eq!(handle.port_list(None).await.unwrap(), None);
    assert_eq!(handle.set_motor(40, None, None).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn disconnect_emits_once() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);
    let id = handle.connect().await.unwrap();
    next_event(&mut events, |e| matches!(e, HubEvent::Connected(_))).await;

    handle.disconnect().await.unwrap();
    assert_eq!(
        next_event(&mut events, |e| matches!(e, HubEvent::Disconnected(_))).await,
        HubEvent::Disconnected(id.clone())
    );
    sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert!(!transport.is_connected(&id));
    assert!(!transport.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn commands_resolve_by_ordinal_and_name() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("w-left", "Left"), wedo2_profile());
    transport.add_hub(wedo2_hub("w-right", "Right"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);
    handle.connect().await.unwrap();

    let mut order = Vec::new();
    for _ in 0..2 {
        if let HubEvent::Connected(id) =
            next_event(&mut events, |e| matches!(e, HubEvent::Connected(_))).await
        {
            order.push(id);
        }
    }
    transport.take_writes();

    let second = handle
        .set_led_color(1, 2, 3, Some(HubRef::Ordinal(1)))
        .await
        .unwrap();
    assert_eq!(second.as_ref(), Some(&order[1]));
    assert_eq!(transport.take_writes()[0].hub, order[1]);

    let right = handle
        .set_led_color(1, 2, 3, Some("Right".into()))
        .await
        .unwrap();
    assert_eq!(right, Some(HubId::new("w-right")));

    let first = handle.set_led_color(4, 5, 6, None).await.unwrap();
    assert_eq!(first.as_ref(), Some(&order[0]));

    transport.take_writes();
    assert_eq!(
        handle.set_led_color(1, 2, 3, Some("Nobody".into())).await.unwrap(),
        None
    );
    assert_eq!(
        handle.set_sound(440, 100, Some(HubRef::Ordinal(5))).await.unwrap(),
        None
    );
    assert!(transport.take_writes().is_empty());

    assert_eq!(handle.signal_strength(Some("Left".into())).await.unwrap(), Some(-55));
}

#[tokio::test(start_paused = true)]
async fn adapter_power_off_fails_pending_connect() {
    let transport = SimulatedTransport::new();
    let (handle, _events, _task) = start(&transport);

    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.connect().await }
    });
    sleep(Duration::from_millis(10)).await;
    assert!(transport.is_scanning());

    transport.set_powered(false);
    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::AdapterUnavailable(state)) if state == "PoweredOff"));
    assert!(!transport.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn writes_before_discovery_are_not_ready() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("bare", "LPF2 Smart Hub 2 I/O"), Vec::new());
    let (handle, _events, _task) = start(&transport);
    handle.connect().await.unwrap();

    assert!(matches!(
        handle.set_led_color(1, 2, 3, None).await,
        Err(Error::NotReady)
    ));
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_writes_reach_the_caller() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, _events, _task) = start(&transport);
    handle.connect().await.unwrap();

    transport.fail_writes(true);
    assert!(matches!(
        handle.set_sound(440, 100, None).await,
        Err(Error::BleError(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn malformed_notifications_are_dropped() {
    let transport = SimulatedTransport::new();
    transport.add_hub(wedo2_hub("wedo", "LPF2 Smart Hub 2 I/O"), wedo2_profile());
    let (handle, mut events, _task) = start(&transport);
    let id = handle.connect().await.unwrap();

    transport.notify(&id, "1527", &[9, 1, 0, 1]);
    transport.notify(&id, "1560", &[0]);
    transport.notify(&id, "180f", &[64]);
    assert_eq!(
        next_event(&mut events, |e| matches!(e, HubEvent::Battery { .. })).await,
        HubEvent::Battery { value: 64, hub: id }
    );
    assert_eq!(handle.port_list(None).await.unwrap(), Some(Vec::new()));
}
