use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// List every adapter that has stored migration state
    Adapters {
        #[arg(long, help = "Print the list as JSON")]
        json: bool,
    },

    /// Show the current stage, counters and queue state of an adapter
    Status {
        #[arg(long, help = "Adapter id, e.g. 'business-directory'")]
        adapter: String,

        #[arg(long, help = "Print the status as JSON instead of a table")]
        json: bool,
    },

    /// Print the run log of an adapter
    Logs {
        #[arg(long, help = "Adapter id")]
        adapter: String,

        #[arg(long, default_value_t = 0, help = "Only show entries after this sequence number")]
        after: u64,

        #[arg(long, help = "Print one JSON object per entry")]
        json: bool,
    },

    /// List the source -> destination id map of one entity kind
    Mappings {
        #[arg(long, help = "Adapter id")]
        adapter: String,

        #[arg(long, help = "Entity kind, e.g. 'category' or 'tag'")]
        entity: String,

        #[arg(long, help = "Print the mappings as JSON")]
        json: bool,
    },

    /// Request a cooperative stop of an adapter's migration
    Abort {
        #[arg(long, help = "Adapter id")]
        adapter: String,
    },

    /// Drop an adapter's stored run state
    Reset {
        #[arg(long, help = "Adapter id")]
        adapter: String,

        #[arg(
            long,
            help = "Keep id mappings so the next run updates instead of duplicating"
        )]
        keep_mappings: bool,
    },
}
