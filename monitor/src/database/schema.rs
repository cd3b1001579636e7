//! Database schema definitions
//!
//! Timestamps are Unix milliseconds. Stake amounts are decimal TEXT so they
//! are not limited to 64 bits.

pub const CREATE_PEERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS peers (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    first_seen BIGINT NOT NULL,
    last_seen BIGINT NOT NULL,
    node_name TEXT,
    client_version TEXT,
    ip_address TEXT,
    port INTEGER,
    geo_country TEXT,
    geo_city TEXT,
    geo_lat DOUBLE PRECISION,
    geo_lon DOUBLE PRECISION,
    geo_isp TEXT,
    geo_updated BIGINT,
    geo_confidence TEXT,
    seen_by_count INTEGER NOT NULL DEFAULT 0,
    is_bootstrapper BOOLEAN NOT NULL DEFAULT FALSE,
    catchup_status TEXT,
    latency_ms BIGINT,
    packets_sent BIGINT,
    packets_received BIGINT,
    grpc_bootstrapper BOOLEAN
);

CREATE INDEX IF NOT EXISTS idx_peers_source ON peers(source);
CREATE INDEX IF NOT EXISTS idx_peers_last_seen ON peers(last_seen);
CREATE INDEX IF NOT EXISTS idx_peers_geo_updated ON peers(geo_updated);
"#;

pub const CREATE_PEER_CONNECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS peer_connections (
    reporter_id TEXT NOT NULL,
    peer_id TEXT NOT NULL,
    last_seen BIGINT NOT NULL,
    PRIMARY KEY (reporter_id, peer_id)
);

CREATE INDEX IF NOT EXISTS idx_peer_connections_peer ON peer_connections(peer_id);
"#;

pub const CREATE_VALIDATORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS validators (
    baker_id BIGINT PRIMARY KEY,
    account_address TEXT NOT NULL,
    equity_capital TEXT NOT NULL,
    delegated_capital TEXT NOT NULL,
    total_stake TEXT NOT NULL,
    effective_stake TEXT NOT NULL,
    lottery_power DOUBLE PRECISION NOT NULL,
    baking_commission DOUBLE PRECISION NOT NULL DEFAULT 0,
    finalization_commission DOUBLE PRECISION NOT NULL DEFAULT 0,
    transaction_commission DOUBLE PRECISION NOT NULL DEFAULT 0,
    open_status TEXT,
    in_current_payday BOOLEAN NOT NULL DEFAULT FALSE,
    source TEXT NOT NULL,
    linked_peer_id TEXT,
    data_completeness DOUBLE PRECISION NOT NULL,
    state_transition_count INTEGER NOT NULL DEFAULT 0,
    first_observed BIGINT NOT NULL,
    last_chain_update BIGINT NOT NULL,
    blocks_24h INTEGER NOT NULL DEFAULT 0,
    blocks_7d INTEGER NOT NULL DEFAULT 0,
    last_block_height BIGINT,
    last_block_time BIGINT
);

CREATE INDEX IF NOT EXISTS idx_validators_source ON validators(source);
CREATE INDEX IF NOT EXISTS idx_validators_lottery_power ON validators(lottery_power);
"#;

pub const CREATE_VALIDATOR_TRANSITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS validator_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    baker_id BIGINT NOT NULL,
    timestamp BIGINT NOT NULL,
    transition_type TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    evidence TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_validator_transitions_baker ON validator_transitions(baker_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_validator_transitions_type ON validator_transitions(transition_type);
CREATE INDEX IF NOT EXISTS idx_validator_transitions_timestamp ON validator_transitions(timestamp);
"#;

pub const CREATE_CONSENSUS_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS consensus_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp BIGINT NOT NULL,
    total_validators INTEGER NOT NULL,
    visible_validators INTEGER NOT NULL,
    phantom_validators INTEGER NOT NULL,
    validator_coverage_pct DOUBLE PRECISION NOT NULL,
    total_stake TEXT NOT NULL,
    visible_stake TEXT NOT NULL,
    phantom_stake TEXT NOT NULL,
    stake_visibility_pct DOUBLE PRECISION NOT NULL,
    quorum_health TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_consensus_snapshots_timestamp ON consensus_snapshots(timestamp);
"#;

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    height BIGINT PRIMARY KEY,
    hash TEXT NOT NULL,
    baker_id BIGINT,
    timestamp BIGINT NOT NULL,
    recorded_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blocks_baker ON blocks(baker_id);
CREATE INDEX IF NOT EXISTS idx_blocks_timestamp ON blocks(timestamp);
"#;

pub const CREATE_CONSENSUS_ALERTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS consensus_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    metadata TEXT NOT NULL,
    acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
    acknowledged_at BIGINT
);

CREATE INDEX IF NOT EXISTS idx_consensus_alerts_type ON consensus_alerts(alert_type, timestamp);
CREATE INDEX IF NOT EXISTS idx_consensus_alerts_timestamp ON consensus_alerts(timestamp);
"#;

pub const CREATE_QUORUM_HEALTH_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS quorum_health_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp BIGINT NOT NULL,
    health TEXT NOT NULL,
    stake_visibility_pct DOUBLE PRECISION NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quorum_health_history_timestamp ON quorum_health_history(timestamp);
"#;

pub const CREATE_NODE_HEALTH_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS node_health_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    timestamp BIGINT NOT NULL,
    peers_count INTEGER NOT NULL,
    finalized_height BIGINT,
    consensus_running BOOLEAN NOT NULL,
    uptime_ms BIGINT,
    restart_detected BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_node_health_history_node ON node_health_history(node_id, timestamp);
"#;

/// Schema in creation order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_PEERS_TABLE,
    CREATE_PEER_CONNECTIONS_TABLE,
    CREATE_VALIDATORS_TABLE,
    CREATE_VALIDATOR_TRANSITIONS_TABLE,
    CREATE_CONSENSUS_SNAPSHOTS_TABLE,
    CREATE_BLOCKS_TABLE,
    CREATE_CONSENSUS_ALERTS_TABLE,
    CREATE_QUORUM_HEALTH_HISTORY_TABLE,
    CREATE_NODE_HEALTH_HISTORY_TABLE,
];
