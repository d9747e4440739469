use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use hcs_purchase_records::config::{Cli, Command, Config, QueryArgs, SimulateArgs};
use hcs_purchase_records::error::Error;
use hcs_purchase_records::identity::IdentityProvider;
use hcs_purchase_records::ids::TopicId;
use hcs_purchase_records::mirror_server::{self, API_PREFIX};
use hcs_purchase_records::simulation::Simulation;
use hcs_purchase_records::topic::{acquire_topic, TopicAcquisition};
use hcs_purchase_records::{HederaLedger, LedgerClient, LocalLedger, MirrorNode, Options};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let command = cli
        .command
        .clone()
        .unwrap_or_else(|| Command::Simulate(SimulateArgs::default()));

    let result = match command {
        Command::Simulate(args) => simulate(&cli, &args).await,
        Command::Query(args) => query(&cli, &args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "an error occurred in main execution");
            ExitCode::FAILURE
        }
    }
}

async fn simulate(cli: &Cli, args: &SimulateArgs) -> Result<(), Error> {
    let config = Config::for_simulation(cli, args)?;

    if args.local {
        let ledger = LocalLedger::new(config.operator_id, config.operator_key.clone());
        info!(operator = %config.operator_id, "client created for an in-process ledger");
        let result = async {
            let addr = mirror_server::serve(ledger.clone(), SocketAddr::from(([127, 0, 0, 1], 0))).await?;
            let mirror_url = format!("http://{}{}", addr, API_PREFIX);
            let mirror = MirrorNode::new(&mirror_url, config.mirror_options(true))?;
            run_simulation(&ledger, &mirror, &config, args).await
        }
        .await;
        close(&ledger).await;
        result
    } else {
        let ledger = HederaLedger::for_network(
            &config.network,
            config.operator_id,
            config.operator_key.clone(),
        )?;
        info!(operator = %config.operator_id, network = %config.network, "client created");
        let result = async {
            let mirror = MirrorNode::new(
                config.remote_mirror_url(),
                config.mirror_options(config.allow_http),
            )?;
            run_simulation(&ledger, &mirror, &config, args).await
        }
        .await;
        close(&ledger).await;
        result
    }
}

async fn close<C: LedgerClient>(ledger: &C) {
    info!("closing client");
    ledger.close().await;
}

async fn run_simulation<C: LedgerClient>(
    ledger: &C,
    mirror: &MirrorNode,
    config: &Config,
    args: &SimulateArgs,
) -> Result<(), Error> {
    let identities = IdentityProvider::probe(ledger, &config.network, config.did_topic_id).await;
    let acquisition = acquire_topic(ledger, config.topic_id, args.propagation_delay()).await?;
    if let TopicAcquisition::Replaced { abandoned, created } = acquisition {
        warn!(
            %abandoned,
            %created,
            "records are going to a new topic; set TOPIC_ID={} to keep using it",
            created
        );
    }

    let report = Simulation::new(
        ledger,
        mirror,
        &identities,
        acquisition.topic_id(),
        args.simulation_config(),
    )
    .run()
    .await?;

    if report.all_complete() {
        info!("process finished, every record was read back");
    } else {
        let incomplete = report.users.iter().filter(|u| !u.is_complete()).count();
        warn!(incomplete, "process finished with users missing records");
    }
    Ok(())
}

async fn query(cli: &Cli, args: &QueryArgs) -> Result<(), Error> {
    let topic_id: TopicId = args.topic.parse()?;
    let mirror = MirrorNode::new(
        cli.query_mirror_url(),
        Options {
            allow_http: cli.allow_http,
            timeout: cli.timeout,
            page_limit: cli.page_limit,
            ..Options::default()
        },
    )?;

    let records = mirror
        .fetch_records_by_identity(topic_id, &args.identity)
        .await?;
    info!(
        topic = %topic_id,
        identity = %args.identity,
        "found {} records",
        records.len()
    );
    for record in &records {
        info!(
            "  [rec #{} | time: {}] item: {}, price: {}, order id: {}",
            record.data.sequence,
            record.consensus_timestamp,
            record.data.item,
            record.data.price,
            record.data.order_id
        );
    }
    Ok(())
}
