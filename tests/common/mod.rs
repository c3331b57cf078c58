pub mod mock_forge;
