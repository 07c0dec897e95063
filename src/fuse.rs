//! FUSE transport adapter
//!
//! Bridges the synchronous kernel callbacks delivered by fuser onto the
//! async virtual directory engine with a dedicated tokio runtime. Inodes
//! are minted lazily: one per distinct tag-path spelling and one per file
//! record.

use crate::metadata::{FileInfo, Tag};
use crate::ufs;
use crate::vfs::{append_if_missing, dir_attr, DirEntry, FileHandle, Node, TagFilesystem};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, Request,
};
use libc::{EINVAL, ENOENT};
use std::{
    collections::HashMap,
    ffi::OsStr,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(1);

const ROOT_INO: u64 = 1;

#[derive(Clone)]
enum NodeRef {
    Dir(Vec<Tag>),
    File(FileInfo),
}

pub struct TagfsFuse {
    fs: TagFilesystem,
    rt: Runtime,
    inode_map: RwLock<HashMap<String, u64>>,
    nodes: RwLock<HashMap<u64, NodeRef>>,
    next_ino: AtomicU64,
    handles: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<FileHandle>>>>,
    next_fh: AtomicU64,
}

impl TagfsFuse {
    pub fn new(fs: TagFilesystem) -> anyhow::Result<Self> {
        let rt = Runtime::new()?;
        let mut inode_map = HashMap::new();
        let mut nodes = HashMap::new();
        inode_map.insert(dir_key(&[]), ROOT_INO);
        nodes.insert(ROOT_INO, NodeRef::Dir(Vec::new()));
        Ok(Self {
            fs,
            rt,
            inode_map: RwLock::new(inode_map),
            nodes: RwLock::new(nodes),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        })
    }

    pub fn mount(self, mount_point: &str) -> anyhow::Result<()> {
        let options = [
            MountOption::FSName("tagfs".to_string()),
            MountOption::AutoUnmount,
            MountOption::DefaultPermissions,
        ];
        fuser::mount2(self, mount_point, &options)?;
        Ok(())
    }

    fn ensure_inode(&self, key: String, node: NodeRef) -> u64 {
        if let Some(ino) = self.inode_map.read().unwrap().get(&key) {
            return *ino;
        }
        let mut map = self.inode_map.write().unwrap();
        if let Some(ino) = map.get(&key) {
            return *ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        map.insert(key, ino);
        self.nodes.write().unwrap().insert(ino, node);
        ino
    }

    fn node_for(&self, ino: u64) -> Option<NodeRef> {
        self.nodes.read().unwrap().get(&ino).cloned()
    }

    fn dir_path_for(&self, ino: u64) -> Option<Vec<Tag>> {
        match self.node_for(ino)? {
            NodeRef::Dir(path) => Some(path),
            NodeRef::File(_) => None,
        }
    }

    /// Register a looked-up node and produce its reply attributes.
    fn entry_for(&self, node: Node) -> Result<(u64, FileAttr), i32> {
        match node {
            Node::Dir(dir) => {
                let path = dir.path().to_vec();
                let ino = self.ensure_inode(dir_key(&path), NodeRef::Dir(path));
                Ok((ino, to_fuse_attr(ino, &dir_attr())))
            }
            Node::File(file) => {
                let info = file.info().clone();
                let attr = self
                    .rt
                    .block_on(async { file.attr().await })
                    .map_err(|e| e.errno())?;
                let ino = self.ensure_inode(file_key(&info), NodeRef::File(info));
                Ok((ino, to_fuse_attr(ino, &attr)))
            }
        }
    }
}

impl Filesystem for TagfsFuse {
    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.node_for(ino) {
            Some(NodeRef::Dir(_)) => reply.attr(&TTL, &to_fuse_attr(ino, &dir_attr())),
            Some(NodeRef::File(info)) => {
                let node = self.fs.file_node(info);
                match self.rt.block_on(async { node.attr().await }) {
                    Ok(attr) => reply.attr(&TTL, &to_fuse_attr(ino, &attr)),
                    Err(e) => reply.error(e.errno()),
                }
            }
            None => reply.error(ENOENT),
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(path) = self.dir_path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_string_lossy();
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.lookup(&name).await }) {
            Ok(node) => match self.entry_for(node) {
                Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.dir_path_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        let dir = self.fs.dir_at(path.clone());
        let entries = match self.rt.block_on(async { dir.read_dir_all().await }) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut all = Vec::with_capacity(entries.len() + 2);
        all.push((ino, FileType::Directory, ".".to_string()));
        all.push((ino, FileType::Directory, "..".to_string()));
        for entry in entries {
            match entry {
                DirEntry::Tag(tag) => {
                    let name = tag.text.clone();
                    let child = append_if_missing(&path, tag);
                    let child_ino = self.ensure_inode(dir_key(&child), NodeRef::Dir(child));
                    all.push((child_ino, FileType::Directory, name));
                }
                DirEntry::File(info) => {
                    let name = info.name.clone();
                    let child_ino = self.ensure_inode(file_key(&info), NodeRef::File(info));
                    all.push((child_ino, FileType::RegularFile, name));
                }
            }
        }

        let start = if offset < 0 { 0 } else { offset as usize };
        for (i, (child_ino, kind, name)) in all.into_iter().enumerate().skip(start) {
            let next_offset = (i + 1) as i64;
            if reply.add(child_ino, next_offset, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.dir_path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_string_lossy();
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.mkdir(&name).await }) {
            Ok(child) => {
                let child_path = child.path().to_vec();
                let ino = self.ensure_inode(dir_key(&child_path), NodeRef::Dir(child_path));
                reply.entry(&TTL, &to_fuse_attr(ino, &dir_attr()), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.dir_path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_string_lossy();
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.remove(&name, true).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(path) = self.dir_path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_string_lossy();
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.remove(&name, false).await }) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.dir_path_for(newparent) else {
            reply.error(ENOENT);
            return;
        };
        let Some(old) = self.node_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        let old = match old {
            NodeRef::Dir(p) => Node::Dir(self.fs.dir_at(p)),
            NodeRef::File(info) => Node::File(self.fs.file_node(info)),
        };
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.link(&old).await }) {
            Ok(()) => match self.entry_for(old) {
                Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        _link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(path) = self.dir_path_for(parent) else {
            reply.error(ENOENT);
            return;
        };
        let target = target.to_string_lossy();
        let dir = self.fs.dir_at(path);
        match self.rt.block_on(async { dir.symlink(&target).await }) {
            Ok(node) => match self.entry_for(Node::File(node)) {
                Ok((_ino, attr)) => reply.entry(&TTL, &attr, 0),
                Err(errno) => reply.error(errno),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(NodeRef::File(info)) = self.node_for(ino) else {
            reply.error(ENOENT);
            return;
        };
        let node = self.fs.file_node(info);
        match self.rt.block_on(async { node.open().await }) {
            Ok(handle) => {
                let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
                self.handles
                    .lock()
                    .unwrap()
                    .insert(fh, Arc::new(tokio::sync::Mutex::new(handle)));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        let handle = {
            let handles = self.handles.lock().unwrap();
            handles.get(&fh).cloned()
        };
        let Some(handle) = handle else {
            reply.error(ENOENT);
            return;
        };
        // Reads are served sequentially from the handle's cursor; the
        // kernel tracks the offset. A read never comes back partially
        // populated mid-buffer, only short at end of stream.
        let res = self.rt.block_on(async {
            let mut handle = handle.lock().await;
            handle.read(size as usize).await
        });
        match res {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.lock().unwrap().remove(&fh);
        reply.ok();
    }
}

fn dir_key(path: &[Tag]) -> String {
    let texts: Vec<&str> = path.iter().map(|t| t.text.as_str()).collect();
    format!("d:{}", texts.join("/"))
}

fn file_key(info: &FileInfo) -> String {
    format!("f:{}", info.id)
}

fn to_fuse_attr(ino: u64, attr: &ufs::FileAttr) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: 1,
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.crtime,
        crtime: attr.crtime,
        kind: if attr.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        },
        perm: attr.perm,
        nlink: if attr.is_dir { 2 } else { 1 },
        uid: unsafe { libc::geteuid() },
        gid: unsafe { libc::getegid() },
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}
