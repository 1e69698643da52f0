//! Two instances sharing one in-memory bus.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use clipper_chat::hub::{Hub, HubConfig, HubHandle};
use clipper_chat::relay::{MemoryBus, PubSubBus, Relay};
use clipper_chat::store::{MemoryStore, ModerationPolicy};

use common::{default_context, eventually, is_presence, is_type, TestClient};

const TOPIC: &str = "chat:general";

struct Instance {
    hub: HubHandle,
    store: Arc<MemoryStore>,
}

fn instance(bus: &Arc<MemoryBus>, server_id: &str) -> Instance {
    let store = Arc::new(MemoryStore::open());
    let relay = Relay::new(bus.clone() as Arc<dyn PubSubBus>, server_id, "chat");
    let hub = Hub::spawn(
        "general",
        HubConfig::default(),
        Some(relay),
        Some(store.clone() as Arc<dyn ModerationPolicy>),
    );
    Instance { hub, store }
}

#[tokio::test]
async fn test_message_crosses_instances_exactly_once() {
    let bus = Arc::new(MemoryBus::new());
    let a = instance(&bus, "instance-a");
    let b = instance(&bus, "instance-b");

    let mut x = TestClient::join(&a.hub, &default_context(a.store.clone()), "user-x");
    assert!(eventually(|| bus.subscriber_count(TOPIC) == 1).await);

    let mut y = TestClient::join(&b.hub, &default_context(b.store.clone()), "user-y");
    assert!(eventually(|| bus.subscriber_count(TOPIC) == 2).await);

    // Y's join on B is announced to X on A
    x.wait_for(|v| is_presence(v, "user-y", "joined")).await;

    x.say("hello from a");

    let received = y.wait_for(|v| is_type(v, "message")).await;
    assert_eq!(received["data"]["user_id"], "user-x");
    assert_eq!(received["data"]["content"], "hello from a");

    let extra = y.drain(Duration::from_millis(300)).await;
    assert!(
        extra.iter().all(|v| !is_type(v, "message")),
        "relayed message delivered more than once: {extra:?}"
    );

    // The sender's own instance never gets its publish back
    let echoed = x.drain(Duration::from_millis(300)).await;
    assert!(echoed.iter().all(|v| !is_type(v, "message")));
}

#[tokio::test]
async fn test_relay_traffic_is_not_republished() {
    let bus = Arc::new(MemoryBus::new());
    let a = instance(&bus, "instance-a");
    let b = instance(&bus, "instance-b");

    // Count every frame on the topic, independent of either instance
    let mut tap = bus.subscribe(TOPIC).await.unwrap();

    let x = TestClient::join(&a.hub, &default_context(a.store.clone()), "user-x");
    let mut y = TestClient::join(&b.hub, &default_context(b.store.clone()), "user-y");
    assert!(eventually(|| bus.subscriber_count(TOPIC) == 3).await);

    x.say("one");
    y.wait_for(|v| is_type(v, "message")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut chat_frames = 0;
    while let Ok(Some(raw)) =
        tokio::time::timeout(Duration::from_millis(100), futures::StreamExt::next(&mut tap)).await
    {
        let frame: serde_json::Value = serde_json::from_str(&raw).unwrap();
        if frame["payload"]["type"] == "message" {
            assert_eq!(frame["origin"], "instance-a");
            chat_frames += 1;
        }
    }
    assert_eq!(chat_frames, 1);
}

#[tokio::test]
async fn test_subscription_released_when_last_local_client_leaves() {
    let bus = Arc::new(MemoryBus::new());
    let a = instance(&bus, "instance-a");

    let x = TestClient::join(&a.hub, &default_context(a.store.clone()), "user-x");
    assert!(eventually(|| bus.subscriber_count(TOPIC) == 1).await);

    x.send_json(json!({ "type": "typing", "is_typing": false }));
    x.send(axum::extract::ws::Message::Close(None));
    x.task.await.unwrap();

    assert!(eventually(|| bus.subscriber_count(TOPIC) == 0).await);
    assert_eq!(a.hub.client_count(), 0);
}
