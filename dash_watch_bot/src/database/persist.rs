use std::{
    fs::File,
    io::{BufReader, ErrorKind, Write},
    path::Path,
};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use super::Error;

/// Read a JSON document. A missing file is an empty document; anything that
/// fails to parse is an error, so a botched file doesn't get silently wiped.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T, Error> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("{} does not exist, starting fresh.", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(Error::Io {
                path: path.to_owned(),
                source,
            })
        }
    };

    serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Json {
        path: path.to_owned(),
        source,
    })
}

/// Write a JSON document by writing a temporary file next to it and
/// renaming it over the original, so readers never see half a file.
pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    write_atomically(path, &to_json(path, value)?)
}

/// Same as [`save`], but the file work runs on tokio's blocking threads.
pub async fn save_in_background<T: Serialize + Sync>(path: &Path, value: &T) -> Result<(), Error> {
    let bytes = to_json(path, value)?;
    let target = path.to_owned();
    tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
        .await
        .map_err(|e| Error::Io {
            path: path.to_owned(),
            source: std::io::Error::other(e),
        })?
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec_pretty(value).map_err(|source| Error::Json {
        path: path.to_owned(),
        source,
    })
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let io_error = |source| Error::Io {
        path: path.to_owned(),
        source,
    };

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(io_error)?;
    temp.write_all(bytes).map_err(io_error)?;
    temp.as_file().sync_all().map_err(io_error)?;
    temp.persist(path).map_err(|e| io_error(e.error))?;

    Ok(())
}
