/// Build artefacts, version control metadata and scratch files that are never worth indexing
pub const DEFAULT_EXCLUDE_FILTERS: &[&str] = &[
	// temporary and backup files
	"*~",
	"*.part",
	"*.tmp",
	"*.swp",
	"*.swap",
	"*.orig",
	"*.rej",
	// compiled objects
	"*.o",
	"*.a",
	"*.so",
	"*.la",
	"*.lo",
	"*.loT",
	"*.moc",
	"*.class",
	"*.pyc",
	"*.pyo",
	"*.elc",
	"*.qmlc",
	"*.jsc",
	"moc_*.cpp",
	"qrc_*.cpp",
	"ui_*.h",
	// build system leftovers
	"cmake_install.cmake",
	"CMakeCache.txt",
	"CTestTestfile.cmake",
	"CMakeFiles",
	"CMakeTmp",
	"libtool",
	"config.status",
	"confdefs.h",
	"autom4te",
	"conftest",
	"confstat",
	".ninja_deps",
	".ninja_log",
	"build.ninja",
	// version control
	"CVS",
	".svn",
	".git",
	"_darcs",
	".bzr",
	".hg",
	// package managers and caches
	"node_modules",
	"node_packages",
	".npm",
	".yarn",
	"__pycache__",
	"target",
	// virtual machine images
	"*.vdi",
	"*.vmdk",
	"*.qcow2",
	"*.vhd",
	"*.vhdx",
	"lost+found",
];
