use std::{sync::Arc, time};

use log4rs::{
  append::console::ConsoleAppender,
  config::{Appender, Root},
  encode::pattern::PatternEncoder,
  Config,
};
use log::LevelFilter;
use futures::StreamExt;
use rcc_core::{
  adapter::{mock::MockRadioAdapter, RadioAdapter},
  command::{CommandOp, CommandRequest},
  Core, CorrelationId, PowerDbm, RadioId,
};
use smol::Timer;

const SECOND: time::Duration = time::Duration::from_millis(1000);

fn main() {
  configure_logging();

  // Assemble the core: hub, manager, orchestrator, heartbeat ticker.
  let core = Core::builder().build().unwrap();

  // One mock radio with the default band plan and power range.
  let adapter = Arc::new(MockRadioAdapter::builder("silvus-001").build().unwrap());
  core
    .manager()
    .register("silvus-001", "silvus-4200", adapter as Arc<dyn RadioAdapter>)
    .unwrap();
  core
    .manager()
    .load_capabilities(&RadioId::from("silvus-001"), SECOND)
    .unwrap();
  core.manager().set_active(&RadioId::from("silvus-001")).unwrap();

  let subscription = core.hub().subscribe(None, None).unwrap();

  smol::block_on(async {
    let mut tick_stream = futures::StreamExt::fuse(Timer::interval(SECOND / 2));
    let mut event_stream = subscription.receiver().as_stream();

    let mut issued = 0u32;

    loop {
      futures::select! {
        event = event_stream.select_next_some() => {
          println!("[{}] {}: {:?}", event.id, event.kind, event.payload);
        }
        _ = tick_stream.select_next_some() => {
          if issued == 10 {
            break;
          }
          issued += 1;
          let request = CommandRequest::new(
            CorrelationId::new(format!("demo-{issued}")).unwrap(),
            "silvus-001",
            CommandOp::SetPower(PowerDbm((issued * 3 % 30) as i32)),
          );
          match core.orchestrator().execute(request) {
            Ok(outcome) => println!(
              "command demo-{issued} ok: power now {:?}",
              outcome.power_dbm
            ),
            Err(e) => println!("command demo-{issued} failed: {e}"),
          }
        }
      }
    }
  });

  core.shutdown();
}

// Console-only logging at info level, so the core's lifecycle and audit
// lines interleave with the demo's own output.
fn configure_logging() {
  let console = ConsoleAppender::builder()
    .encoder(Box::new(PatternEncoder::new("{l:<5} {t} - {m}{n}")))
    .build();
  let config = Config::builder()
    .appender(Appender::builder().build("console", Box::new(console)))
    .build(Root::builder().appender("console").build(LevelFilter::Info))
    .expect("valid logging config");
  log4rs::init_config(config).expect("logging initialised once");
}
