mod layered_loading;
