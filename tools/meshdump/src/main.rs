use std::{
	fs,
	path::{
		Path,
		PathBuf
	},
	sync::mpsc::{
		channel,
		Sender
	},
	thread
};

use anyhow::{
	bail,
	Context,
	Result
};
use clap::Parser;
use rayon::prelude::*;

use pmk_core::{
	scene::Mesh,
	texture::Texture
};
use pmk_models_capcom::{
	load_companion_texture,
	EmdDecoder,
	Revision
};
use pmk_models_playstation::TmdDecoder;
use pmk_textures_playstation::decode_texture_or_empty;

/// Print the meshes decoded from EMD and TMD model files
#[derive(Parser, Debug)]
#[command(name = "pmk-meshdump")]
struct Args {
	/// Model files, `.emd` or `.tmd`
	#[arg(required = true)]
	files: Vec<PathBuf>,

	/// EMD format revision
	#[arg(short, long, default_value_t = Revision::Textured)]
	revision: Revision,

	/// TIM image used for every EMD file instead of the one stored next to it
	#[arg(short, long, conflicts_with = "no_texture")]
	texture: Option<PathBuf>,

	/// Skip texture lookup; EMD faces carry no texture coordinates
	#[arg(long)]
	no_texture: bool,

	/// Decoder threads, defaults to one per core
	#[arg(short, long)]
	jobs: Option<usize>,

	/// Log decoder progress
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Format {
	Emd,
	Tmd,
}

impl Format {
	fn of(path: &Path) -> Option<Format> {
		let ext = path.extension()?.to_str()?.to_ascii_lowercase();
		match ext.as_str() {
			"emd" => Some(Format::Emd),
			pmk_models_playstation::EXTENSION => Some(Format::Tmd),
			_ => None,
		}
	}
}

fn decode_file(path: &Path, args: &Args, shared: Option<&Texture>, sink: &mut Sender<Mesh>) -> Result<usize> {
	let format = match Format::of(path) {
		Some(f) => f,
		None => bail!("{}: not an EMD or TMD file", path.display()),
	};
	let input = fs::read(path).with_context(|| format!("reading {}", path.display()))?;

	let count = match format {
		Format::Emd => {
			let companion;
			let texture = if args.no_texture || !args.revision.capabilities().texture_coords {
				None
			} else if shared.is_some() {
				shared
			} else {
				companion = load_companion_texture(path);
				companion.as_ref()
			};

			EmdDecoder::new(&input, args.revision, texture)
				.and_then(|mut dec| dec.stream(sink))
				.with_context(|| format!("decoding {}", path.display()))?
		},
		Format::Tmd => TmdDecoder::new(&input)
			.and_then(|mut dec| dec.stream(sink))
			.with_context(|| format!("decoding {}", path.display()))?,
	};

	Ok(count)
}

fn print_mesh(mesh: &Mesh) {
	let quads = mesh.faces.iter().filter(|f| f.polygon.corners() == 4).count();
	let textured = mesh.faces.iter().filter(|f| f.uvs.is_some()).count();

	print!("  {}: {} vertices, {} normals, {} faces ({} quads, {} textured)", mesh.name,
		mesh.vertices.len(), mesh.normals.len(), mesh.faces.len(), quads, textured);

	match mesh.faces.iter().find_map(|f| f.colors.as_ref()?.first()) {
		Some(color) => println!(", first color {}", color.hex_rgb()),
		None => println!(),
	}
}

fn main() -> Result<()> {
	let args = Args::parse();

	let filter = if args.verbose {
		tracing_subscriber::EnvFilter::new("debug")
	} else {
		tracing_subscriber::EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
	};
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();

	// an unreadable image decodes as empty and EMD faces then carry no coordinates
	let shared = match args.texture {
		Some(ref path) => {
			let input = fs::read(path).with_context(|| format!("reading texture {}", path.display()))?;
			let tex = decode_texture_or_empty(&input);
			tracing::info!("{}: {}x{} {}bpp, {} palette(s)", path.display(), tex.width, tex.height,
				tex.bits_per_pixel, tex.palettes.len());
			Some(tex)
		},
		None => None,
	};

	let mut pool = rayon::ThreadPoolBuilder::new();
	if let Some(jobs) = args.jobs {
		pool = pool.num_threads(jobs);
	}
	let pool = pool.build().context("starting decoder threads")?;

	let (senders, receivers): (Vec<_>, Vec<_>) = args.files.iter().map(|_| channel::<Mesh>()).unzip();

	// decode everything in parallel, print in argument order as meshes arrive
	let results = thread::scope(|s| {
		let worker = s.spawn(|| pool.install(|| {
			args.files.par_iter()
				.zip(senders.into_par_iter())
				.map(|(path, mut tx)| decode_file(path, &args, shared.as_ref(), &mut tx))
				.collect::<Vec<_>>()
		}));

		for (path, rx) in args.files.iter().zip(receivers) {
			println!("{}", path.display());
			for mesh in rx {
				print_mesh(&mesh);
			}
		}

		worker.join()
	});

	let results = match results {
		Ok(r) => r,
		Err(_) => bail!("decoder thread panicked"),
	};

	let mut failed = 0;
	for (path, result) in args.files.iter().zip(results) {
		match result {
			Ok(count) => tracing::info!("{}: {} mesh(es)", path.display(), count),
			Err(e) => {
				tracing::error!("{:#}", e);
				failed += 1;
			},
		}
	}

	if failed > 0 {
		bail!("{} of {} file(s) failed", failed, args.files.len());
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_format_of() {
		assert_eq!(Some(Format::Emd), Format::of(Path::new("pl0/EM010.EMD")));
		assert_eq!(Some(Format::Tmd), Format::of(Path::new("model.tmd")));
		assert_eq!(None, Format::of(Path::new("em010.tim")));
		assert_eq!(None, Format::of(Path::new("README")));
	}

	#[test]
	fn test_args() {
		let args = Args::try_parse_from(["pmk-meshdump", "-r", "basic", "--no-texture", "a.emd", "b.tmd"]).unwrap();
		assert_eq!(Revision::Basic, args.revision);
		assert!(args.no_texture);
		assert_eq!(2, args.files.len());

		let args = Args::try_parse_from(["pmk-meshdump", "a.emd"]).unwrap();
		assert_eq!(Revision::Textured, args.revision);
		assert_eq!(None, args.jobs);

		assert!(Args::try_parse_from(["pmk-meshdump", "-r", "psx", "a.emd"]).is_err());
		assert!(Args::try_parse_from(["pmk-meshdump", "-t", "x.tim", "--no-texture", "a.emd"]).is_err());
		assert!(Args::try_parse_from(["pmk-meshdump"]).is_err());
	}

	#[test]
	fn test_unknown_extension() {
		let args = Args::try_parse_from(["pmk-meshdump", "a.obj"]).unwrap();
		let (mut tx, rx) = channel();

		assert!(decode_file(Path::new("a.obj"), &args, None, &mut tx).is_err());
		drop(tx);
		assert_eq!(0, rx.iter().count());
	}
}
