//! End-to-end scenarios driving a naming server and two storage servers
//! together over real TCP connections.

use distfs::naming::server::NamingServer;
use distfs::naming::service::ServiceStub;
use distfs::path::Path;
use distfs::storage::server::StorageServer;
use distfs::storage::service::StorageStub;

fn local(port_hint: &str) -> std::net::SocketAddr {
    port_hint.parse().unwrap()
}

#[tokio::test]
async fn registration_lists_files_and_reports_duplicates() {
    let naming = NamingServer::new();
    let (service_addr, registration_addr) =
        naming.start(local("127.0.0.1:0"), local("127.0.0.1:0")).await.unwrap();
    let service = ServiceStub::new(service_addr);

    let dir1 = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir1.path().join("b")).unwrap();
    std::fs::write(dir1.path().join("a"), b"").unwrap();
    std::fs::write(dir1.path().join("b/c"), b"").unwrap();
    let storage1 = StorageServer::new(dir1.path().to_path_buf());
    storage1.start(local("127.0.0.1:0"), registration_addr).await.unwrap();

    let mut entries = service.list(&Path::parse("/")).await.unwrap();
    entries.sort();
    assert_eq!(entries, vec!["a".to_string(), "b".to_string()]);
    assert!(service.is_directory(&Path::parse("/b")).await.unwrap());

    let s1_storage = service.get_storage(&Path::parse("/a")).await.unwrap();

    // A second storage server starts with an overlapping file and a new one.
    let dir2 = tempfile::tempdir().unwrap();
    std::fs::write(dir2.path().join("a"), b"duplicate").unwrap();
    std::fs::write(dir2.path().join("d"), b"fresh").unwrap();
    let storage2 = StorageServer::new(dir2.path().to_path_buf());
    let (s2_storage_addr, _) =
        storage2.start(local("127.0.0.1:0"), registration_addr).await.unwrap();

    // The duplicate was pruned locally by storage2's own startup.
    assert!(!dir2.path().join("a").exists());
    assert!(dir2.path().join("d").exists());

    // `/a` is still served by the original holder.
    assert_eq!(service.get_storage(&Path::parse("/a")).await.unwrap(), s1_storage);
    assert_eq!(
        service.get_storage(&Path::parse("/d")).await.unwrap().addr(),
        s2_storage_addr
    );

    storage1.stop().await;
    storage2.stop().await;
    naming.stop().await;
}

#[tokio::test]
async fn twenty_shared_releases_trigger_replication() {
    let naming = NamingServer::new();
    let (service_addr, registration_addr) =
        naming.start(local("127.0.0.1:0"), local("127.0.0.1:0")).await.unwrap();
    let service = ServiceStub::new(service_addr);

    let dir1 = tempfile::tempdir().unwrap();
    std::fs::write(dir1.path().join("a"), b"hello").unwrap();
    let storage1 = StorageServer::new(dir1.path().to_path_buf());
    storage1.start(local("127.0.0.1:0"), registration_addr).await.unwrap();

    let dir2 = tempfile::tempdir().unwrap();
    let storage2 = StorageServer::new(dir2.path().to_path_buf());
    let (s2_addr, _) = storage2.start(local("127.0.0.1:0"), registration_addr).await.unwrap();
    let s2_storage = StorageStub::new(s2_addr);

    // s2 holds nothing yet; only s1 serves `/a`.
    assert!(s2_storage.size(&Path::parse("/a")).await.is_err());

    for _ in 0..20 {
        service.lock(&Path::parse("/a"), false).await.unwrap();
        service.unlock(&Path::parse("/a"), false).await.unwrap();
    }

    // The 20th release triggers a copy onto the other registered server.
    assert_eq!(s2_storage.size(&Path::parse("/a")).await.unwrap(), 5);

    storage1.stop().await;
    storage2.stop().await;
    naming.stop().await;
}

#[tokio::test]
async fn exclusive_release_collapses_replicas_to_one() {
    let naming = NamingServer::new();
    let (service_addr, registration_addr) =
        naming.start(local("127.0.0.1:0"), local("127.0.0.1:0")).await.unwrap();
    let service = ServiceStub::new(service_addr);

    let dir1 = tempfile::tempdir().unwrap();
    std::fs::write(dir1.path().join("a"), b"hello").unwrap();
    let storage1 = StorageServer::new(dir1.path().to_path_buf());
    storage1.start(local("127.0.0.1:0"), registration_addr).await.unwrap();

    let dir2 = tempfile::tempdir().unwrap();
    let storage2 = StorageServer::new(dir2.path().to_path_buf());
    let (s2_addr, _) = storage2.start(local("127.0.0.1:0"), registration_addr).await.unwrap();
    let s2_storage = StorageStub::new(s2_addr);

    for _ in 0..20 {
        service.lock(&Path::parse("/a"), false).await.unwrap();
        service.unlock(&Path::parse("/a"), false).await.unwrap();
    }
    assert!(s2_storage.size(&Path::parse("/a")).await.is_ok());

    service.lock(&Path::parse("/a"), true).await.unwrap();
    service.unlock(&Path::parse("/a"), true).await.unwrap();

    // The write-driven collapse dropped every replica but the first holder.
    assert!(s2_storage.size(&Path::parse("/a")).await.is_err());

    storage1.stop().await;
    storage2.stop().await;
    naming.stop().await;
}

#[tokio::test]
async fn two_waiters_on_an_exclusive_lock_proceed_in_turn() {
    let naming = NamingServer::new();
    let (service_addr, _) = naming.start(local("127.0.0.1:0"), local("127.0.0.1:0")).await.unwrap();
    let service = ServiceStub::new(service_addr);
    service.create_directory(&Path::parse("/b")).await.unwrap();
    let path = Path::parse("/b/c");

    service.lock(&path, true).await.unwrap();

    let waiter_service = service;
    let waiter_path = path.clone();
    let waiter = tokio::spawn(async move {
        waiter_service.lock(&waiter_path, false).await.unwrap();
        waiter_service.unlock(&waiter_path, false).await.unwrap();
    });

    // Give the waiter time to enqueue before releasing the writer.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    service.unlock(&path, true).await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap();

    naming.stop().await;
}

#[tokio::test]
async fn create_file_requires_an_existing_parent_then_delete_removes_both() {
    let naming = NamingServer::new();
    let (service_addr, registration_addr) =
        naming.start(local("127.0.0.1:0"), local("127.0.0.1:0")).await.unwrap();
    let service = ServiceStub::new(service_addr);

    let err = service.create_file(&Path::parse("/e/f")).await.unwrap_err();
    assert_eq!(err.kind, distfs::error::ErrorKind::NotFound);

    let dir1 = tempfile::tempdir().unwrap();
    let storage1 = StorageServer::new(dir1.path().to_path_buf());
    storage1.start(local("127.0.0.1:0"), registration_addr).await.unwrap();

    assert!(service.create_directory(&Path::parse("/e")).await.unwrap());
    assert!(service.create_file(&Path::parse("/e/f")).await.unwrap());

    assert!(service.delete(&Path::parse("/e")).await.unwrap());
    assert!(service.is_directory(&Path::parse("/e")).await.is_err());

    storage1.stop().await;
    naming.stop().await;
}
