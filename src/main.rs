fn main() -> anyhow::Result<()> {
    kobo_dhis2_sync::cli::run()
}
