pub mod mock_downloader;
