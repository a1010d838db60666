use dedupl_core::error::Result;

fn main() -> Result<()> {
    dedupl::application::run()
}
