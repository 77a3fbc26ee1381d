fn main() -> anyhow::Result<()> {
    factory_sight_lib::run()
}
