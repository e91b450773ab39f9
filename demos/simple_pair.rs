use portnet::bottle::Bottle;
use portnet::name::InProcessResolver;
use portnet::port::{MessageSink, PortContext, PortCore, Replier, Route};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, Level};

fn init_logging() {
    tracing_subscriber::fmt()
        // .with_max_level(Level::INFO)
        .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let context = PortContext::new(Arc::new(InProcessResolver::new()));

    let talker = PortCore::new(context.clone());
    talker.open("/talker").await?;

    let listener = PortCore::new(context.clone());
    listener.open("/listener").await?;
    listener.set_callback(Arc::new(PrintSink {}));

    talker.add_output("/listener", "tcp").await?;

    let mut greeting = Bottle::from_text("hello world");
    greeting.add_i32(42);
    talker.send(&greeting).await;

    let mut status = Bottle::new();
    status.add_string("pos");
    status.add_list(Bottle::from_text("left top"));
    talker.send(&status).await;

    // the same port pair can also carry a request / reply conversation
    let reply = talker.send_with_reply(&Bottle::from_text("COUNT 3")).await?;
    info!("rpc reply: {}", reply);

    sleep(Duration::from_millis(20)).await;
    talker.close().await;
    listener.close().await;
    Ok(())
}

struct PrintSink {}

#[async_trait::async_trait]
impl MessageSink for PrintSink {
    async fn on_message(&self, route: &Route, bottle: Bottle, replier: Option<Replier>) {
        info!("received {} on {}", bottle, route);
        if let Some(replier) = replier {
            let mut reply = Bottle::new();
            reply.add_string("ACK");
            reply.add(bottle.get(1).clone());
            replier.reply(reply);
        }
    }
}
