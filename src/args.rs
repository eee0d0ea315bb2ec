use clap::Parser;

/// Workbench runner for the poll widget.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The scenario to execute, in JSON format. See the scenarios/
    /// directory for examples of the format.
    #[clap(short, long, value_parser)]
    pub scenario: String,

    /// (file path) A reference report in JSON format. If provided, pollwb will
    /// check that the executed scenario matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path or 'stdout') If specified, the scenario report will be written
    /// in JSON format to the given location instead of the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
