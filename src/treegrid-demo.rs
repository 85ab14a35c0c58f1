use anyhow::Result;
use rtreegrid::{
    GridConfig, GridEvent, JsonFileStorage, Navigation, RowBinding, RowMetrics, RowPresenter,
    SelectMode, TreeGrid, VirtualItem, VirtualSource,
};
use std::env;

/// Approximate glyph width used to turn text length into a row width.
const GLYPH_WIDTH: f32 = 7.0;

struct Config {
    top_level: usize,
    max_depth: Option<usize>,
    max_children: usize,
    seed: u64,
    viewport_height: f32,
    expand_depth: Option<usize>,
    commands: Vec<(Navigation, SelectMode)>,
    settings_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            top_level: 1_000,
            max_depth: Some(5),
            max_children: 10,
            seed: 42,
            viewport_height: 220.0,
            expand_depth: Some(1),
            commands: Vec::new(),
            settings_file: None,
        }
    }
}

/// Renders rows as indented text lines.
struct TextPresenter {
    row_height: f32,
}

impl RowPresenter<VirtualItem> for TextPresenter {
    type Content = String;

    fn create(&mut self) -> String {
        String::new()
    }

    fn bind(&mut self, content: &mut String, binding: &RowBinding<'_, VirtualItem>) {
        let marker = match (binding.has_children, binding.is_expanded) {
            (false, _) => ' ',
            (true, false) => '+',
            (true, true) => '-',
        };
        let cursor = if binding.is_current { '>' } else { ' ' };
        let selected = if binding.is_selected { '*' } else { ' ' };
        content.clear();
        content.push(cursor);
        content.push(selected);
        content.push_str(&"  ".repeat(binding.depth));
        content.push(marker);
        content.push(' ');
        content.push_str(&binding.item.to_string());
    }

    fn measure(&mut self, content: &String, _binding: &RowBinding<'_, VirtualItem>) -> RowMetrics {
        RowMetrics {
            height: self.row_height,
            width: content.chars().count() as f32 * GLYPH_WIDTH,
        }
    }

    fn header_height(&self) -> f32 {
        self.row_height
    }
}

fn parse_navigation(word: &str) -> Result<(Navigation, SelectMode)> {
    let (name, mode) = match word.strip_prefix('+') {
        Some(rest) => (rest, SelectMode::Extend),
        None => (word, SelectMode::Single),
    };
    let nav = match name {
        "up" => Navigation::Up,
        "down" => Navigation::Down,
        "pageup" => Navigation::PageUp,
        "pagedown" => Navigation::PageDown,
        "home" => Navigation::Home,
        "end" => Navigation::End,
        other => anyhow::bail!("Unknown navigation command: {}", other),
    };
    Ok((nav, mode))
}

fn parse_depth(value: &str) -> Result<Option<usize>> {
    if value == "inf" {
        Ok(None)
    } else {
        Ok(Some(value.parse()?))
    }
}

fn parse_args() -> Result<Config> {
    let args: Vec<String> = env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-rows" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-rows requires an argument");
                }
                config.top_level = args[i].parse()?;
            }
            "-depth" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-depth requires an argument");
                }
                config.max_depth = parse_depth(&args[i])?;
            }
            "-children" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-children requires an argument");
                }
                config.max_children = args[i].parse()?;
            }
            "-seed" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-seed requires an argument");
                }
                config.seed = args[i].parse()?;
            }
            "-height" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-height requires an argument");
                }
                config.viewport_height = args[i].parse()?;
            }
            "-expand" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-expand requires an argument");
                }
                config.expand_depth = parse_depth(&args[i])?;
            }
            "-nav" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-nav requires a comma separated command list");
                }
                for word in args[i].split(',').filter(|w| !w.is_empty()) {
                    config.commands.push(parse_navigation(word)?);
                }
            }
            "-settings" => {
                i += 1;
                if i >= args.len() {
                    anyhow::bail!("-settings requires a file path argument");
                }
                config.settings_file = Some(args[i].clone());
            }
            "-h" | "-help" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                log::warn!("Unknown argument: {}", args[i]);
            }
        }
        i += 1;
    }

    if config.expand_depth.is_none() && config.max_depth.is_none() {
        anyhow::bail!("-expand inf needs a finite -depth");
    }
    Ok(config)
}

fn print_help() {
    println!("Tree grid demo");
    println!("Usage: treegrid-demo [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -rows <N>              Top-level rows (default: 1000)");
    println!("  -depth <N|inf>         Levels in the hierarchy (default: 5)");
    println!("  -children <N>          Max children per row (default: 10)");
    println!("  -seed <N>              Generator seed (default: 42)");
    println!("  -height <PX>           Viewport height in pixels (default: 220)");
    println!("  -expand <N|inf>        Levels to expand up front (default: 1)");
    println!("  -nav <CMDS>            Commands: up,down,pageup,pagedown,home,end");
    println!("                         A leading '+' extends the selection");
    println!("  -settings <FILE>       Restore and save expansion state here");
    println!("  -h, -help, --help      Print this help message");
    println!();
    println!("Set RUST_LOG=rtreegrid=debug for engine logging.");
}

fn print_viewport(grid: &TreeGrid<VirtualSource, TextPresenter>) {
    println!(
        "--- rows {} | top {} | pass {} | cache {}/{} | rebinds {} ---",
        grid.total_rows(),
        grid.top_index(),
        grid.layout_pass(),
        grid.cache_len(),
        grid.cache_capacity(),
        grid.rebind_count()
    );
    for row in grid.visible_rows() {
        println!("{:>8} {}", row.index, row.content);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let config = parse_args()?;

    let source = VirtualSource::with_config(config.top_level, config.max_depth, config.max_children, config.seed);
    let grid_config = GridConfig::default();
    let presenter = TextPresenter {
        row_height: grid_config.row_height,
    };
    let mut grid = TreeGrid::with_config(source, presenter, grid_config);
    grid.set_viewport(640.0, config.viewport_height);

    let mut storage = match &config.settings_file {
        Some(path) => Some(JsonFileStorage::open(path)?),
        None => None,
    };
    let restored = match storage.as_ref() {
        Some(storage) => grid.restore_expansion_from(storage, "expansion"),
        None => 0,
    };
    if restored == 0 {
        grid.expand_all(config.expand_depth);
    }

    grid.update();
    print_viewport(&grid);

    for (nav, mode) in &config.commands {
        let Some(target) = grid.navigate(*nav, *mode) else {
            continue;
        };
        println!("{nav:?} ({mode:?}) -> row {target}");
        print_viewport(&grid);
    }

    for event in grid.drain_events() {
        if !matches!(event, GridEvent::LayoutComplete { .. }) {
            log::info!("{event:?}");
        }
    }
    println!("selected: {:?}", grid.selected_items().iter().map(ToString::to_string).collect::<Vec<_>>());

    if let Some(storage) = storage.as_mut() {
        grid.save_expansion_to(storage, "expansion")?;
        println!("expansion saved to {}", storage.path().display());
    }
    Ok(())
}
