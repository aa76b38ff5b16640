//! Builder - lowers a library's recipe into configure / compile / install
//! commands and runs them, each sub-step gated on the previous one.
//!
//! Every recipe string is a template; see [`TemplateVars`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::core::context::BuildContext;
use crate::core::library::{
    env_name, AutoconfRecipe, BuildRecipe, CMakeRecipe, CustomRecipe, LibrarySpec, MakeRecipe,
};
use crate::provision::errors::ProvisionError;
use crate::provision::fetcher;
use crate::provision::hooks;
use crate::util::fs::ensure_dir;
use crate::util::process::{find_cmake, find_make, output_text, ProcessBuilder};

/// Sub-steps of a build, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStep {
    Configure,
    Compile,
    Install,
}

impl BuildStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStep::Configure => "configure",
            BuildStep::Compile => "compile",
            BuildStep::Install => "install",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placeholder values substituted into recipe templates.
///
/// `{prefix}`, `{source}`, `{build}`, `{jobs}`, `{cc}`, `{cxx}`, `{mpicc}`,
/// `{mpicxx}`, `{cflags}`, `{cxxflags}`, `{build_type}` and one
/// `{<PREREQ>_PATH}` per prerequisite. `{{` and `}}` are literal braces.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables for one library build.
    pub fn for_library(
        ctx: &BuildContext,
        source: &Path,
        build: &Path,
        prerequisites: &BTreeMap<String, PathBuf>,
    ) -> Self {
        let tc = &ctx.toolchain;
        let mut vars = TemplateVars::new();
        vars.set("prefix", ctx.install_root.display().to_string());
        vars.set("source", source.display().to_string());
        vars.set("build", build.display().to_string());
        vars.set("jobs", ctx.jobs.to_string());
        vars.set("cc", tc.cc.as_deref().unwrap_or("cc"));
        vars.set("cxx", tc.cxx.as_deref().unwrap_or("c++"));
        vars.set("mpicc", tc.mpicc.as_deref().unwrap_or("mpicc"));
        vars.set("mpicxx", tc.mpicxx.as_deref().unwrap_or("mpicxx"));
        vars.set("cflags", tc.cflags.join(" "));
        vars.set("cxxflags", tc.cxxflags.join(" "));
        vars.set("build_type", ctx.build_type.cmake_name());
        for (name, root) in prerequisites {
            vars.set(format!("{}_PATH", env_name(name)), root.display().to_string());
        }
        vars
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Substitute every placeholder in `template`.
    pub fn expand(&self, template: &str) -> Result<String, String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(format!("unterminated placeholder in `{}`", template))
                            }
                        }
                    }
                    match self.get(&name) {
                        Some(value) => out.push_str(value),
                        None => {
                            return Err(format!(
                                "unknown placeholder `{{{}}}` in `{}`",
                                name, template
                            ))
                        }
                    }
                }
                c => out.push(c),
            }
        }

        Ok(out)
    }

    fn expand_all(&self, templates: &[String]) -> Result<Vec<String>, String> {
        templates.iter().map(|t| self.expand(t)).collect()
    }
}

/// Commands of one sub-step.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step: BuildStep,
    pub commands: Vec<ProcessBuilder>,
}

/// A fully expanded build of one library.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub library: String,
    pub steps: Vec<PlannedStep>,
}

impl BuildPlan {
    /// Commands of one sub-step (empty if the recipe has none).
    pub fn commands(&self, step: BuildStep) -> &[ProcessBuilder] {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| s.commands.as_slice())
            .unwrap_or_default()
    }
}

/// Lower a recipe into concrete commands.
///
/// `prerequisites` maps each prerequisite name to its verified root.
pub fn plan(
    spec: &LibrarySpec,
    ctx: &BuildContext,
    source: &Path,
    prerequisites: &BTreeMap<String, PathBuf>,
) -> Result<BuildPlan, ProvisionError> {
    let build = fetcher::build_dir(&ctx.scratch_dir(spec));
    let vars = TemplateVars::for_library(ctx, source, &build, prerequisites);

    let mut env = ctx.toolchain.env();
    env.insert(
        "EXTERNAL_INSTALL_LOCATION".to_string(),
        ctx.install_root.display().to_string(),
    );
    for (name, root) in prerequisites {
        env.insert(format!("{}_PATH", env_name(name)), root.display().to_string());
    }
    env.extend(ctx.passthrough.clone());

    let lowering = Lowering {
        ctx,
        vars: &vars,
        env: &env,
        source,
        build: &build,
    };
    let steps = match &spec.recipe {
        BuildRecipe::Autoconf(recipe) => lowering.autoconf(recipe),
        BuildRecipe::Make(recipe) => lowering.make(recipe),
        BuildRecipe::Cmake(recipe) => lowering.cmake(recipe),
        BuildRecipe::Custom(recipe) => lowering.custom(recipe),
    }
    .map_err(|message| ProvisionError::Configuration {
        library: spec.name.clone(),
        message,
    })?;

    Ok(BuildPlan {
        library: spec.name.clone(),
        steps,
    })
}

struct Lowering<'a> {
    ctx: &'a BuildContext,
    vars: &'a TemplateVars,
    env: &'a BTreeMap<String, String>,
    source: &'a Path,
    build: &'a Path,
}

impl Lowering<'_> {
    fn command(&self, program: impl AsRef<Path>, cwd: &Path) -> ProcessBuilder {
        ProcessBuilder::new(program).envs(self.env).cwd(cwd)
    }

    fn argv(&self, argv: &[String], cwd: &Path) -> Result<ProcessBuilder, String> {
        let argv = self.vars.expand_all(argv)?;
        ProcessBuilder::from_argv(&argv)
            .map(|cmd| cmd.envs(self.env).cwd(cwd))
            .ok_or_else(|| "empty command in recipe".to_string())
    }

    fn make_program() -> PathBuf {
        find_make().unwrap_or_else(|| PathBuf::from("make"))
    }

    fn autoconf(&self, recipe: &AutoconfRecipe) -> Result<Vec<PlannedStep>, String> {
        let make = Self::make_program();
        let mut configure = Vec::new();
        if !recipe.bootstrap.is_empty() {
            configure.push(self.argv(&recipe.bootstrap, self.source)?);
        }
        configure.push(
            self.command(self.source.join("configure"), self.source)
                .arg(format!("--prefix={}", self.ctx.install_root.display()))
                .args(self.vars.expand_all(&recipe.configure_args)?),
        );

        let compile = self
            .command(&make, self.source)
            .arg(format!("-j{}", self.ctx.jobs))
            .args(self.vars.expand_all(&recipe.make_args)?);
        let install = self
            .command(&make, self.source)
            .arg("install")
            .args(self.vars.expand_all(&recipe.make_args)?);

        Ok(vec![
            PlannedStep {
                step: BuildStep::Configure,
                commands: configure,
            },
            PlannedStep {
                step: BuildStep::Compile,
                commands: vec![compile],
            },
            PlannedStep {
                step: BuildStep::Install,
                commands: vec![install],
            },
        ])
    }

    fn make(&self, recipe: &MakeRecipe) -> Result<Vec<PlannedStep>, String> {
        let make = Self::make_program();
        let vars = recipe
            .vars
            .iter()
            .map(|(k, v)| Ok(format!("{}={}", k, self.vars.expand(v)?)))
            .collect::<Result<Vec<_>, String>>()?;

        let mut compile = self
            .command(&make, self.source)
            .arg(format!("-j{}", self.ctx.jobs));
        if let Some(ref target) = recipe.target {
            compile = compile.arg(self.vars.expand(target)?);
        }
        let compile = compile.args(&vars);

        let install = self
            .command(&make, self.source)
            .arg(self.vars.expand(&recipe.install_target)?)
            .args(&vars);

        Ok(vec![
            PlannedStep {
                step: BuildStep::Compile,
                commands: vec![compile],
            },
            PlannedStep {
                step: BuildStep::Install,
                commands: vec![install],
            },
        ])
    }

    fn cmake(&self, recipe: &CMakeRecipe) -> Result<Vec<PlannedStep>, String> {
        let cmake = find_cmake().unwrap_or_else(|| PathBuf::from("cmake"));
        let tc = &self.ctx.toolchain;
        let config = self.ctx.build_type.cmake_name();

        let source = match recipe.source_subdir {
            Some(ref subdir) => self.source.join(subdir),
            None => self.source.to_path_buf(),
        };

        let mut configure = self
            .command(&cmake, self.build)
            .arg("-S")
            .arg(&source)
            .arg("-B")
            .arg(self.build)
            .arg(format!("-DCMAKE_BUILD_TYPE={}", config))
            .arg(format!(
                "-DCMAKE_INSTALL_PREFIX={}",
                self.ctx.install_root.display()
            ))
            .arg("-DCMAKE_POSITION_INDEPENDENT_CODE=ON");
        if let Some(ref cc) = tc.cc {
            configure = configure.arg(format!("-DCMAKE_C_COMPILER={}", cc));
        }
        if let Some(ref cxx) = tc.cxx {
            configure = configure.arg(format!("-DCMAKE_CXX_COMPILER={}", cxx));
        }
        let configure = configure.args(self.vars.expand_all(&recipe.args)?);

        let mut compile = self
            .command(&cmake, self.build)
            .arg("--build")
            .arg(self.build)
            .arg("--parallel")
            .arg(self.ctx.jobs.to_string())
            .arg("--config")
            .arg(config);
        if !recipe.targets.is_empty() {
            compile = compile
                .arg("--target")
                .args(self.vars.expand_all(&recipe.targets)?);
        }

        let install = self
            .command(&cmake, self.build)
            .arg("--install")
            .arg(self.build)
            .arg("--config")
            .arg(config);

        Ok(vec![
            PlannedStep {
                step: BuildStep::Configure,
                commands: vec![configure],
            },
            PlannedStep {
                step: BuildStep::Compile,
                commands: vec![compile],
            },
            PlannedStep {
                step: BuildStep::Install,
                commands: vec![install],
            },
        ])
    }

    fn custom(&self, recipe: &CustomRecipe) -> Result<Vec<PlannedStep>, String> {
        let lower = |commands: &[Vec<String>]| -> Result<Vec<ProcessBuilder>, String> {
            commands.iter().map(|argv| self.argv(argv, self.source)).collect()
        };
        Ok(vec![
            PlannedStep {
                step: BuildStep::Configure,
                commands: lower(&recipe.configure)?,
            },
            PlannedStep {
                step: BuildStep::Compile,
                commands: lower(&recipe.compile)?,
            },
            PlannedStep {
                step: BuildStep::Install,
                commands: lower(&recipe.install)?,
            },
        ])
    }
}

/// Held from a library's install step through its post-install hooks, so
/// the headers a hook sees as changed are the ones its own library
/// installed.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

fn install_lock() -> MutexGuard<'static, ()> {
    INSTALL_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run a plan, stopping at the first failing command.
pub fn execute(plan: &BuildPlan) -> Result<(), ProvisionError> {
    run_steps(&plan.library, plan.steps.iter())
}

fn run_steps<'p>(
    library: &str,
    steps: impl IntoIterator<Item = &'p PlannedStep>,
) -> Result<(), ProvisionError> {
    for planned in steps {
        if planned.commands.is_empty() {
            continue;
        }
        tracing::info!("{} `{}`", planned.step, library);

        for cmd in &planned.commands {
            let build_error = |output: String| ProvisionError::Build {
                library: library.to_string(),
                step: planned.step,
                command: cmd.display_command(),
                output,
            };

            let output = cmd.exec().map_err(|e| build_error(format!("{:#}", e)))?;
            if !output.status.success() {
                let mut text = output_text(&output);
                if let Some(code) = output.status.code() {
                    text = format!("exit code {}\n{}", code, text);
                }
                return Err(build_error(text));
            }
        }
    }
    Ok(())
}

/// Plan and run the build of a fetched, patched source tree, then run the
/// library's post-install hooks.
pub fn build(
    spec: &LibrarySpec,
    ctx: &BuildContext,
    source: &Path,
    prerequisites: &BTreeMap<String, PathBuf>,
) -> Result<(), ProvisionError> {
    let plan = plan(spec, ctx, source, prerequisites)?;

    let build = fetcher::build_dir(&ctx.scratch_dir(spec));
    for dir in [build.as_path(), ctx.install_root.as_path()] {
        ensure_dir(dir).map_err(|e| ProvisionError::Build {
            library: spec.name.clone(),
            step: BuildStep::Configure,
            command: format!("mkdir {}", dir.display()),
            output: format!("{:#}", e),
        })?;
    }

    let (install, prepare): (Vec<&PlannedStep>, Vec<&PlannedStep>) = plan
        .steps
        .iter()
        .partition(|planned| planned.step == BuildStep::Install);
    run_steps(&plan.library, prepare)?;

    let _guard = install_lock();
    let snapshot = if spec.post_install.is_empty() {
        None
    } else {
        Some(hooks::HeaderSnapshot::capture(&ctx.install_root))
    };

    run_steps(&plan.library, install)?;

    if let Some(snapshot) = snapshot {
        hooks::run(spec, &ctx.install_root, &snapshot)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::SourceSpec;
    use tempfile::TempDir;

    fn ctx(tmp: &TempDir) -> BuildContext {
        let mut ctx = BuildContext::new(tmp.path().join("install"), tmp.path().join("scratch"));
        ctx.jobs = 4;
        ctx
    }

    fn spec(recipe: BuildRecipe) -> LibrarySpec {
        LibrarySpec::new("tmLQCD", SourceSpec::Path { path: PathBuf::from("/src") })
            .requires(["lime"])
            .with_recipe(recipe)
    }

    fn prereqs() -> BTreeMap<String, PathBuf> {
        BTreeMap::from([("lime".to_string(), PathBuf::from("/opt/lime"))])
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_template_expansion() {
        let mut vars = TemplateVars::new();
        vars.set("prefix", "/opt/ext");
        vars.set("LIME_PATH", "/opt/lime");

        assert_eq!(
            vars.expand("--with-limedir={LIME_PATH}").unwrap(),
            "--with-limedir=/opt/lime"
        );
        assert_eq!(vars.expand("{prefix}/lib:{{x}}").unwrap(), "/opt/ext/lib:{x}");
        assert!(vars.expand("{QUDA_PATH}").unwrap_err().contains("unknown placeholder"));
        assert!(vars.expand("{prefix").unwrap_err().contains("unterminated"));
    }

    #[test]
    fn test_autoconf_lowering() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(&tmp);
        let source = tmp.path().join("scratch/tmLQCD/src");
        let recipe = BuildRecipe::Autoconf(AutoconfRecipe {
            bootstrap: vec!["autoconf".to_string()],
            configure_args: vec!["--with-limedir={LIME_PATH}".to_string()],
            make_args: Vec::new(),
        });

        let plan = plan(&spec(recipe), &ctx, &source, &prereqs()).unwrap();
        let configure = plan.commands(BuildStep::Configure);
        assert_eq!(configure.len(), 2);
        assert_eq!(configure[0].get_program(), Path::new("autoconf"));
        assert_eq!(configure[1].get_program(), source.join("configure"));
        assert_eq!(
            configure[1].get_args(),
            &[
                format!("--prefix={}", ctx.install_root.display()),
                "--with-limedir=/opt/lime".to_string()
            ]
        );
        assert_eq!(configure[1].get_cwd(), Some(source.as_path()));
        assert_eq!(plan.commands(BuildStep::Compile)[0].get_args(), &["-j4".to_string()]);
        assert_eq!(plan.commands(BuildStep::Install)[0].get_args(), &["install".to_string()]);
    }

    #[test]
    fn test_autoconf_install_repeats_make_args() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = ctx(&tmp);
        ctx.toolchain.mpicc = Some("mpiicc".to_string());
        let recipe = BuildRecipe::Autoconf(AutoconfRecipe {
            bootstrap: Vec::new(),
            configure_args: Vec::new(),
            make_args: vec!["CC={mpicc}".to_string()],
        });

        let plan = plan(&spec(recipe), &ctx, Path::new("/s"), &prereqs()).unwrap();
        assert_eq!(
            plan.commands(BuildStep::Compile)[0].get_args(),
            &["-j4", "CC=mpiicc"].map(String::from)
        );
        assert_eq!(
            plan.commands(BuildStep::Install)[0].get_args(),
            &["install", "CC=mpiicc"].map(String::from)
        );
    }

    #[test]
    fn test_make_lowering_passes_variables() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = ctx(&tmp);
        ctx.toolchain.mpicc = Some("mpiicc".to_string());
        let recipe = BuildRecipe::Make(MakeRecipe {
            target: Some("library".to_string()),
            install_target: "install".to_string(),
            vars: BTreeMap::from([
                ("CC".to_string(), "{mpicc}".to_string()),
                ("LIMEDIR".to_string(), "{LIME_PATH}".to_string()),
            ]),
        });

        let plan = plan(&spec(recipe), &ctx, Path::new("/s"), &prereqs()).unwrap();
        assert!(plan.commands(BuildStep::Configure).is_empty());
        assert_eq!(
            plan.commands(BuildStep::Compile)[0].get_args(),
            &["-j4", "library", "CC=mpiicc", "LIMEDIR=/opt/lime"].map(String::from)
        );
        assert_eq!(
            plan.commands(BuildStep::Install)[0].get_args(),
            &["install", "CC=mpiicc", "LIMEDIR=/opt/lime"].map(String::from)
        );
    }

    #[test]
    fn test_cmake_lowering() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = ctx(&tmp);
        ctx.build_type = crate::core::context::BuildType::Debug;
        ctx.toolchain.cxx = Some("g++".to_string());
        let recipe = BuildRecipe::Cmake(CMakeRecipe {
            args: vec!["-DQUDA_GPU_ARCH=sm_60".to_string()],
            source_subdir: None,
            targets: Vec::new(),
        });

        let plan = plan(&spec(recipe), &ctx, Path::new("/s"), &prereqs()).unwrap();
        let configure = &plan.commands(BuildStep::Configure)[0];
        let args = configure.get_args();
        assert!(args.contains(&"-DCMAKE_BUILD_TYPE=Debug".to_string()));
        assert!(args.contains(&format!("-DCMAKE_INSTALL_PREFIX={}", ctx.install_root.display())));
        assert!(args.contains(&"-DCMAKE_CXX_COMPILER=g++".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-DQUDA_GPU_ARCH=sm_60"));

        let compile = plan.commands(BuildStep::Compile)[0].display_command();
        assert!(compile.contains("--parallel 4 --config Debug"));
        assert!(plan.commands(BuildStep::Install)[0].display_command().contains("--install"));
    }

    #[test]
    fn test_environment_carries_prefix_and_prerequisites() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = ctx(&tmp);
        ctx.toolchain.cc = Some("gcc".to_string());
        ctx.passthrough.insert("BUILD_TESTS".to_string(), "OFF".to_string());

        let recipe = BuildRecipe::Custom(CustomRecipe {
            compile: vec![sh("true")],
            ..CustomRecipe::default()
        });
        let plan = plan(&spec(recipe), &ctx, Path::new("/s"), &prereqs()).unwrap();
        let cmd = &plan.commands(BuildStep::Compile)[0];
        assert_eq!(cmd.get_env("LIME_PATH"), Some("/opt/lime"));
        assert_eq!(cmd.get_env("CC"), Some("gcc"));
        assert_eq!(cmd.get_env("BUILD_TESTS"), Some("OFF"));
        let prefix = ctx.install_root.display().to_string();
        assert_eq!(cmd.get_env("EXTERNAL_INSTALL_LOCATION"), Some(prefix.as_str()));
    }

    #[test]
    fn test_unknown_placeholder_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let recipe = BuildRecipe::Custom(CustomRecipe {
            compile: vec![vec!["make".to_string(), "QUDA={QUDA_PATH}".to_string()]],
            ..CustomRecipe::default()
        });
        let err = plan(&spec(recipe), &ctx(&tmp), Path::new("/s"), &prereqs()).unwrap_err();
        assert!(matches!(err, ProvisionError::Configuration { .. }));
        assert!(err.to_string().contains("QUDA_PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_runs_steps_in_order() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(&tmp);
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();

        let recipe = BuildRecipe::Custom(CustomRecipe {
            configure: vec![sh("echo configure >> steps.log")],
            compile: vec![sh("echo compile >> steps.log")],
            install: vec![sh(
                "echo install >> steps.log && mkdir -p {prefix}/lib && touch {prefix}/lib/libtmLQCD.so",
            )],
        });
        build(&spec(recipe), &ctx, &source, &prereqs()).unwrap();

        let log = std::fs::read_to_string(source.join("steps.log")).unwrap();
        assert_eq!(log, "configure\ncompile\ninstall\n");
        assert!(ctx.install_root.join("lib/libtmLQCD.so").is_file());
        assert!(tmp.path().join("scratch/tmLQCD/build").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_compile_stops_before_install() {
        let tmp = TempDir::new().unwrap();
        let ctx = ctx(&tmp);
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();

        let recipe = BuildRecipe::Custom(CustomRecipe {
            configure: vec![sh("true")],
            compile: vec![sh("echo 'lime.h: No such file' >&2; exit 2")],
            install: vec![sh("touch installed")],
        });
        let err = build(&spec(recipe), &ctx, &source, &prereqs()).unwrap_err();

        match err {
            ProvisionError::Build {
                library,
                step,
                output,
                ..
            } => {
                assert_eq!(library, "tmLQCD");
                assert_eq!(step, BuildStep::Compile);
                assert!(output.contains("exit code 2"));
                assert!(output.contains("lime.h: No such file"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!source.join("installed").exists());
    }
}
