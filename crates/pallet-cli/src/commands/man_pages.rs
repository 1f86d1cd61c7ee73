use super::EXIT_SUCCESS;
use clap::{Command, CommandFactory};
use std::path::Path;

/// Write `pallet.1` plus one page per subcommand into `dir`.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let root = C::command();
    let bin = root.get_name().to_owned();
    write_page(&root, &dir.join(format!("{bin}.1")))?;
    let mut written = 1;
    for sub in root.get_subcommands().filter(|s| !s.is_hide_set()) {
        let page = dir.join(format!("{bin}-{}.1", sub.get_name()));
        write_page(sub, &page)?;
        written += 1;
    }
    println!("wrote {written} man pages to {}", dir.display());
    Ok(EXIT_SUCCESS)
}

fn write_page(cmd: &Command, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .render(&mut buf)
        .map_err(|e| format!("failed to render {}: {e}", path.display()))?;
    std::fs::write(path, buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}
