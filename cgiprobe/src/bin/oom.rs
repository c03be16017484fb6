fn main() -> anyhow::Result<()> {
    cgiprobe::run(cgiprobe::Endpoint::Stress)
}
