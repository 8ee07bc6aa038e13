//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Unreal Plugin Manager - resolve, build and install engine plugins
#[derive(Parser, Debug)]
#[command(name = "upm")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file applied over the global and project configs
    #[arg(short, long, global = true, env = "UPM_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Resolve a plugin's dependencies without building anything
    Resolve {
        /// Plugin source directory or manifest file
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Engine version to resolve for (defaults to the newest installed engine)
        #[arg(short, long)]
        engine: Option<String>,

        /// Target platform (repeatable; defaults to the configured platforms)
        #[arg(short, long = "platform")]
        platforms: Vec<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Build a plugin and its dependencies into the binary cache
    ///
    /// Examples:
    ///   upm build                          # Current directory, default engine
    ///   upm build -e 5.3 -e 5.4 -p Win64   # Two engines, one platform
    ///   upm build --publish                # Share packages through the registry
    Build {
        /// Plugin source directory or manifest file
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Engine version to build for (repeatable)
        #[arg(short, long = "engine")]
        engines: Vec<String>,

        /// Target platform (repeatable)
        #[arg(short, long = "platform")]
        platforms: Vec<String>,

        /// Upload the built packages to their published releases
        #[arg(long)]
        publish: bool,
    },

    /// Build and install a plugin into an engine
    ///
    /// TARGET is a published plugin name, or a path to a plugin source tree.
    Install {
        target: String,

        /// Version constraint for a published plugin, e.g. ">=1.2, <2"
        #[arg(long = "version", value_name = "RANGE")]
        constraint: Option<String>,

        /// Engine name (defaults to the newest launcher install)
        #[arg(short, long)]
        engine: Option<String>,

        /// Permit replacing an installed plugin with an older version
        #[arg(long)]
        allow_downgrade: bool,
    },

    /// Remove an installed plugin from an engine
    Uninstall {
        name: String,

        /// Engine name (defaults to the newest launcher install)
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// List plugins installed in an engine
    List {
        /// Engine name (defaults to the newest launcher install)
        #[arg(short, long)]
        engine: Option<String>,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Show discovered engine installations
    Engines {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Search the registry by name or description
    Search {
        /// Search term; empty lists every plugin
        #[arg(default_value = "")]
        term: String,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Publish a plugin to the registry
    Upload {
        /// Plugin source directory
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Icon image (defaults to Resources/Icon128.png when present)
        #[arg(long)]
        icon: Option<PathBuf>,

        /// Patch file to store with the release (repeatable)
        #[arg(long = "patch")]
        patches: Vec<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_build_with_repeated_flags() {
        let cli = Cli::parse_from([
            "upm", "build", "Plugins/Voxels", "-e", "5.3", "-e", "5.4", "-p", "Win64", "--publish",
        ]);
        assert_eq!(
            cli.command,
            Some(Commands::Build {
                path: PathBuf::from("Plugins/Voxels"),
                engines: vec!["5.3".into(), "5.4".into()],
                platforms: vec!["Win64".into()],
                publish: true,
            })
        );
    }

    #[test]
    fn parse_install_options() {
        let cli = Cli::parse_from([
            "upm",
            "--verbose",
            "install",
            "Voxels",
            "--version",
            "^1.2",
            "--allow-downgrade",
        ]);
        assert!(cli.verbose);
        assert_eq!(
            cli.command,
            Some(Commands::Install {
                target: "Voxels".into(),
                constraint: Some("^1.2".into()),
                engine: None,
                allow_downgrade: true,
            })
        );
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["upm", "search", "--config", "upm.yaml", "voxel"]);
        assert_eq!(cli.config, Some(PathBuf::from("upm.yaml")));
    }
}
