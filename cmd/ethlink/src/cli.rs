use clap::{Arg, ArgAction, Command};
use ethlink_common::node::BootNode;
use tracing::Level;

pub fn cli() -> Command {
    Command::new("ethlink")
        .about("Ethereum execution-layer P2P node")
        .arg(
            Arg::new("discovery.addr")
                .long("discovery.addr")
                .default_value("0.0.0.0")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("discovery.port")
                .long("discovery.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("p2p.addr")
                .long("p2p.addr")
                .default_value("0.0.0.0")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("p2p.port")
                .long("p2p.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("max-peers")
                .long("max-peers")
                .default_value("50")
                .value_name("COUNT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("network-id")
                .long("network-id")
                .default_value("1337")
                .value_name("ID")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("bootnodes")
                .long("bootnodes")
                .value_name("BOOTNODE_LIST")
                .value_parser(clap::value_parser!(BootNode))
                .value_delimiter(',')
                .num_args(1..)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("datadir")
                .long("datadir")
                .value_name("DATA_DIRECTORY")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value(Level::INFO.as_str())
                .value_name("LOG_LEVEL")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("mine")
                .long("mine")
                .action(ArgAction::SetTrue)
                .help("Assemble and seal new blocks against the local transaction pool"),
        )
        .arg(
            Arg::new("miner.coinbase")
                .long("miner.coinbase")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
}
