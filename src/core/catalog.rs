//! Built-in library table for the Lyncs native dependencies.
//!
//! `lyncs-provision init` writes this as the starting Provision.toml.

/// Default manifest covering c-lime, DDalphaAMG, tmLQCD and QUDA.
pub fn default_manifest() -> &'static str {
    DEFAULT_MANIFEST
}

const DEFAULT_MANIFEST: &str = r#"# Native libraries provisioned for the Lyncs API.
#
# Override any setting at run time with -D KEY=VALUE or the environment:
#   INSTALL_PREFIX, CMAKE_BUILD_TYPE, CC, CXX, MPICC, MPICXX,
#   ENABLE_<FEATURE>, ENABLE_<LIB>, <LIB>_PATH

[context]
install-prefix = "external"
scratch-dir = ".provision/scratch"
build-type = "release"

[context.toolchain]
mpicc = "mpicc"
mpicxx = "mpicxx"

[features]
mpi = true
gpu = false

[libraries.lime]
git = "https://github.com/usqcd-software/c-lime.git"
markers = ["lib/liblime.so", "include/lime.h"]
patches-dir = "patches/lime"

[libraries.lime.build]
kind = "autoconf"
bootstrap = ["autoreconf", "-fi"]
configure-args = ["--enable-shared", "CFLAGS=-fPIC {cflags}"]

[libraries.DDalphaAMG]
git = "https://github.com/sbacchio/DDalphaAMG.git"
markers = ["lib/libDDalphaAMG.so", "include/DDalphaAMG.h"]
patches-dir = "patches/DDalphaAMG"
requires = ["lime"]
gate = ["mpi"]

[libraries.DDalphaAMG.build]
kind = "make"
target = "library"
install-target = "install"

[libraries.DDalphaAMG.build.vars]
CC = "{mpicc}"
LIMEDIR = "{LIME_PATH}"
PREFIX = "{prefix}"
BUILD_DIR = "{build}"

[libraries.tmLQCD]
git = "https://github.com/etmc/tmLQCD.git"
markers = ["lib/libtmLQCD.so", "include/measure_gauge_action.h"]
patches-dir = "patches/tmLQCD"
requires = ["lime"]
gate = ["mpi"]

[libraries.tmLQCD.build]
kind = "autoconf"
bootstrap = ["autoconf"]
configure-args = [
    "--with-limedir={LIME_PATH}",
    "--enable-mpi",
    "--with-mpidimension=4",
    "--disable-omp",
    "CC={mpicc}",
]

[libraries.QUDA]
git = "https://github.com/lattice/quda.git"
branch = "develop"
markers = ["lib/libquda.so", "include/quda.h"]
patches-dir = "patches/QUDA"
gate = ["gpu"]
post-install = ["relative-includes"]

[libraries.QUDA.build]
kind = "cmake"
args = [
    "-DQUDA_BUILD_SHAREDLIB=ON",
    "-DQUDA_GPU_ARCH=sm_60",
    "-DQUDA_FORCE_GAUGE=ON",
    "-DQUDA_TEX=OFF",
    "-DQUDA_MPI=ON",
]
"#;
