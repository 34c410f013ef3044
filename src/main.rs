fn main() -> anyhow::Result<()> {
    bkg_check::cli_main::main()
}
