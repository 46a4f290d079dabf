use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    linkwise::apps::run_linkwise(std::env::args().skip(1))
}
