use std::time::Duration;

use galaxy_tests::{init_tracing, start_ephemeral};

/// Smoke test: a running server can tick for a while with sectors present.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, _addr) = start_ephemeral().await?;
    server.create_sector_server(0, 0);

    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    for _ in 0..3 {
        ticker.tick().await;
        server.update(0.005);
    }
    assert_eq!(server.get_sector_server(0, 0).map(|s| s.tick_count()), Some(3));

    server.stop().await;
    Ok(())
}
